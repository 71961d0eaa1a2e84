//! Process-wide control surface
//!
//! The three host-facing operations (start video, start video with audio,
//! stop) act on one installed `SessionController`. Failures cross the
//! boundary as a tagged `CommandError`.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::recording::AudioPolicy;
use crate::session::{RecordingError, SessionController, SessionState, StartRequest};

lazy_static::lazy_static! {
    static ref CONTROLLER: RwLock<Option<Arc<SessionController>>> = RwLock::new(None);
}

/// Error shape returned to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl CommandError {
    fn not_initialized() -> Self {
        Self {
            code: "NOT_INITIALIZED".to_string(),
            message: "No recorder is installed".to_string(),
            details: None,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.details {
            Some(ref details) => write!(f, "[{}] {}: {}", self.code, self.message, details),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<RecordingError> for CommandError {
    fn from(e: RecordingError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.message,
            details: e.detail,
        }
    }
}

/// Install the controller the control operations act on, replacing any
/// previous one
pub fn install(controller: SessionController) -> Arc<SessionController> {
    let controller = Arc::new(controller);
    let previous = {
        let mut slot = CONTROLLER.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.replace(Arc::clone(&controller))
    };
    if let Some(previous) = previous {
        if previous.state() != SessionState::Idle {
            log::warn!("Replacing a recorder whose session is {}", previous.state());
        }
    }
    controller
}

/// Remove the installed controller
pub fn uninstall() -> Option<Arc<SessionController>> {
    CONTROLLER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

/// The installed controller, if any
pub fn installed() -> Option<Arc<SessionController>> {
    CONTROLLER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn controller() -> Result<Arc<SessionController>, CommandError> {
    installed().ok_or_else(CommandError::not_initialized)
}

fn start(name: &str, title: &str, message: &str, audio: AudioPolicy) -> Result<bool, CommandError> {
    let controller = controller()?;
    if !message.is_empty() {
        log::info!("Start recording '{}': {}", name, message);
    }

    let mut request = StartRequest::new(name).with_audio(audio);
    if !title.is_empty() {
        request = request.with_title(title);
    }
    controller.start_with(request)?;
    Ok(true)
}

/// Start a video-only recording named `name`
pub fn start_record_screen(name: &str, title: &str, message: &str) -> Result<bool, CommandError> {
    start(name, title, message, AudioPolicy::None)
}

/// Start a recording with audio, under the configured audio policy
/// (`muxed_track` when the configuration disables audio)
pub fn start_record_screen_and_audio(name: &str, title: &str, message: &str) -> Result<bool, CommandError> {
    let policy = match controller()?.config().audio.policy {
        AudioPolicy::None => AudioPolicy::MuxedTrack,
        policy => policy,
    };
    start(name, title, message, policy)
}

/// Stop the recording and return the container path
pub async fn stop_record_screen() -> Result<String, CommandError> {
    let controller = controller()?;
    let result = controller.stop().await?;
    Ok(result.output_path.to_string_lossy().to_string())
}

/// Current session state, `idle` when no recorder is installed
pub fn recording_state() -> SessionState {
    installed().map(|c| c.state()).unwrap_or(SessionState::Idle)
}
