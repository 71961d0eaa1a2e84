//! Session failures as reported to callers

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::MediaError;

/// Failure taxonomy of the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingErrorKind {
    /// Operation not valid in the current session state
    InvalidState,
    InvalidArgument,
    /// The capture facility refused to start
    CaptureStartFailure,
    /// The container or audio file could not be created
    WriterInitFailure,
    /// Capture or writing failed while the session was running
    MidCaptureError,
    /// Halt or finalize failed
    StopFailure,
}

impl RecordingErrorKind {
    /// Stable code for the boundary
    pub fn code(&self) -> &'static str {
        match self {
            RecordingErrorKind::InvalidState => "INVALID_STATE",
            RecordingErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            RecordingErrorKind::CaptureStartFailure => "CAPTURE_START_FAILED",
            RecordingErrorKind::WriterInitFailure => "WRITER_INIT_FAILED",
            RecordingErrorKind::MidCaptureError => "CAPTURE_FAILED",
            RecordingErrorKind::StopFailure => "STOP_FAILED",
        }
    }
}

/// A session failure: kind, readable message and optional underlying detail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RecordingError {
    pub kind: RecordingErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl RecordingError {
    fn new(kind: RecordingErrorKind, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(RecordingErrorKind::InvalidState, message, None)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RecordingErrorKind::InvalidArgument, message, None)
    }

    pub fn capture_start(error: &MediaError) -> Self {
        Self::new(
            RecordingErrorKind::CaptureStartFailure,
            "Screen capture failed to start",
            Some(error.to_string()),
        )
    }

    pub fn writer_init(error: &MediaError) -> Self {
        Self::new(
            RecordingErrorKind::WriterInitFailure,
            "Could not create the recording file",
            Some(error.to_string()),
        )
    }

    pub fn mid_capture(error: &MediaError) -> Self {
        Self::new(
            RecordingErrorKind::MidCaptureError,
            "Recording failed during capture",
            Some(error.to_string()),
        )
    }

    pub fn stop_failure(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(RecordingErrorKind::StopFailure, message, Some(detail.into()))
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let kinds = [
            RecordingErrorKind::InvalidState,
            RecordingErrorKind::InvalidArgument,
            RecordingErrorKind::CaptureStartFailure,
            RecordingErrorKind::WriterInitFailure,
            RecordingErrorKind::MidCaptureError,
            RecordingErrorKind::StopFailure,
        ];
        let mut codes: Vec<_> = kinds.iter().map(|k| k.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_detail_carries_media_error() {
        let err = RecordingError::mid_capture(&MediaError::SourceError("display lost".to_string()));
        assert_eq!(err.code(), "CAPTURE_FAILED");
        assert_eq!(err.to_string(), "Recording failed during capture");
        assert_eq!(err.detail.as_deref(), Some("Capture source error: display lost"));
    }
}
