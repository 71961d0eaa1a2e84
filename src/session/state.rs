//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle of the single capture session.
///
/// `Idle → Starting → Capturing → Stopping → Idle`. `Error` is entered when
/// capture fails in `Starting` or `Capturing` and is left only through `stop`,
/// which reports the failure and resets to `Idle`.
///
/// Failures detected by `stop` itself (no halt confirmation in time, or the
/// container failing to finalize) are returned to the caller and also end in
/// `Idle` without passing through `Error`. A failed `start` tears down to
/// `Idle` as well, so a new `start` is always possible after a failure has
/// been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Writer open, waiting for the first delivered sample
    Starting,
    Capturing,
    Stopping,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Capturing => "capturing",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        }
    }

    /// States from which `stop` proceeds with a normal finalize
    pub fn is_stoppable(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Capturing)
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
