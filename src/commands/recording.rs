//! Tauri commands for screen recording
//!
//! Thin wrappers over `crate::control`; a recorder must have been installed
//! with `control::install` before the first call.

use tauri::command;

use crate::control::{self, CommandError};
use crate::session::SessionState;

/// Start a video-only recording
///
/// # Arguments
/// * `name` - Output file stem (`<name>.mp4` in the output directory)
/// * `title` - Container title metadata, empty for none
/// * `message` - Free-form note written to the log
#[command]
pub async fn start_record_screen(name: String, title: String, message: String) -> Result<bool, CommandError> {
    control::start_record_screen(&name, &title, &message)
}

/// Start a recording that includes microphone audio
#[command]
pub async fn start_record_screen_and_audio(name: String, title: String, message: String) -> Result<bool, CommandError> {
    control::start_record_screen_and_audio(&name, &title, &message)
}

/// Stop the recording and return the path of the finished file
#[command]
pub async fn stop_record_screen() -> Result<String, CommandError> {
    control::stop_record_screen().await
}

/// Current session state
#[command]
pub async fn get_recording_state() -> Result<SessionState, CommandError> {
    Ok(control::recording_state())
}
