#[cfg(test)]
mod error_tests {
    use crabscreen::control::CommandError;
    use crabscreen::errors::MediaError;
    use crabscreen::session::{RecordingError, RecordingErrorKind};
    use std::error::Error;

    #[test]
    fn test_media_error_display() {
        let cases = [
            (MediaError::SourceError("gone".to_string()), "Capture source error: gone"),
            (MediaError::EncodingError("gone".to_string()), "Encoding error: gone"),
            (MediaError::MuxingError("gone".to_string()), "Muxing error: gone"),
            (MediaError::IoError("gone".to_string()), "IO error: gone"),
            (MediaError::AudioError("gone".to_string()), "Audio error: gone"),
            (MediaError::ConfigError("gone".to_string()), "Configuration error: gone"),
        ];
        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_media_error_debug_format() {
        let error = MediaError::MuxingError("Debug test".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("MuxingError"));
        assert!(debug_str.contains("Debug test"));
    }

    #[test]
    fn test_media_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let error: MediaError = io.into();
        assert!(matches!(error, MediaError::IoError(_)));
        assert!(error.to_string().contains("read-only volume"));
    }

    #[test]
    fn test_media_error_is_std_error() {
        let error: Box<dyn Error> = Box::new(MediaError::SourceError("x".to_string()));
        assert!(error.source().is_none());
    }

    #[test]
    fn test_recording_error_carries_detail() {
        let err = RecordingError::mid_capture(&MediaError::EncodingError("bad frame".to_string()));
        assert_eq!(err.kind, RecordingErrorKind::MidCaptureError);
        assert_eq!(err.code(), "CAPTURE_FAILED");
        assert_eq!(err.detail.as_deref(), Some("Encoding error: bad frame"));
        assert_eq!(err.to_string(), "Recording failed during capture");
    }

    #[test]
    fn test_recording_error_codes() {
        assert_eq!(RecordingError::invalid_state("x").code(), "INVALID_STATE");
        assert_eq!(RecordingError::invalid_argument("x").code(), "INVALID_ARGUMENT");
        let source = MediaError::SourceError("denied".to_string());
        assert_eq!(RecordingError::capture_start(&source).code(), "CAPTURE_START_FAILED");
        assert_eq!(RecordingError::writer_init(&source).code(), "WRITER_INIT_FAILED");
        assert_eq!(RecordingError::stop_failure("x", "y").code(), "STOP_FAILED");
    }

    #[test]
    fn test_recording_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&RecordingErrorKind::CaptureStartFailure).unwrap();
        assert_eq!(json, "\"capture_start_failure\"");
    }

    #[test]
    fn test_command_error_keeps_code_and_detail() {
        let err = RecordingError::writer_init(&MediaError::IoError("disk full".to_string()));
        let cmd = CommandError::from(err);
        assert_eq!(cmd.code, "WRITER_INIT_FAILED");
        assert_eq!(cmd.message, "Could not create the recording file");
        assert_eq!(cmd.details.as_deref(), Some("IO error: disk full"));
        assert!(cmd.to_string().starts_with("[WRITER_INIT_FAILED]"));
    }

    #[test]
    fn test_command_error_round_trips_through_json() {
        let cmd = CommandError::from(RecordingError::invalid_state("No recording in progress"));
        let json = serde_json::to_string(&cmd).unwrap();
        let back: CommandError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
        assert!(back.details.is_none());
    }
}
