//! CrabScreen: screen and audio capture to a single timestamped container
//!
//! A capture source pushes screen frames (and optionally microphone audio)
//! into a session; the session multiplexes them into one MP4 file on a shared
//! time origin, or writes audio to its own file, and reports the result when
//! the recording is stopped.
//!
//! # Features
//! - `microphone`: cpal microphone capture
//! - `plugin`: Tauri plugin exposing the recording commands
//! - `headless`: the `crabscreen-cli` binary
//!
//! # Usage
//! ```rust,ignore
//! use crabscreen::config::RecorderConfig;
//! use crabscreen::control;
//! use crabscreen::session::SessionController;
//! use crabscreen::source::{StopMode, PushSource};
//!
//! let (source, handle) = PushSource::new("screen", StopMode::Immediate);
//! control::install(SessionController::with_mp4(RecorderConfig::load_or_default(), Box::new(source)));
//!
//! control::start_record_screen("clip1", "Demo", "")?;
//! // platform capture callback: handle.push_video(frame);
//! let path = control::stop_record_screen().await?;
//! ```
//!
//! With the `plugin` feature, in a Tauri app:
//! ```rust,ignore
//! tauri::Builder::default()
//!     .plugin(crabscreen::init())
//!     .run(tauri::generate_context!())
//!     .expect("error while running tauri application");
//! ```
#[cfg(feature = "plugin")]
pub mod commands;
pub mod audio;
pub mod config;
pub mod control;
pub mod errors;
pub mod recording;
pub mod session;
pub mod source;
pub mod timing;
pub mod types;

// Testing utilities - synthetic data and an in-memory writer
pub mod testing;

pub use config::RecorderConfig;
pub use control::CommandError;
pub use errors::MediaError;
pub use recording::{AudioPolicy, Muxer, RecordingStats};
pub use session::{RecordingError, RecordingResult, SessionController, SessionInfo, SessionState, StartRequest};
pub use types::{AudioSample, PixelFormat, Track, VideoFrame};

#[cfg(feature = "plugin")]
use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the CrabScreen plugin with the recording commands
#[cfg(feature = "plugin")]
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("crabscreen")
        .invoke_handler(tauri::generate_handler![
            commands::recording::start_record_screen,
            commands::recording::start_record_screen_and_audio,
            commands::recording::stop_record_screen,
            commands::recording::get_recording_state,
        ])
        .build()
}

/// Initialize logging for the recorder
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabscreen=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        microphone: cfg!(feature = "microphone"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Built with microphone capture
    pub microphone: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabscreen");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
    }
}
