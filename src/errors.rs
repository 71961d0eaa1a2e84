use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    SourceError(String),
    EncodingError(String),
    MuxingError(String),
    IoError(String),
    AudioError(String),
    ConfigError(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MediaError::SourceError(msg) => write!(f, "Capture source error: {}", msg),
            MediaError::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            MediaError::MuxingError(msg) => write!(f, "Muxing error: {}", msg),
            MediaError::IoError(msg) => write!(f, "IO error: {}", msg),
            MediaError::AudioError(msg) => write!(f, "Audio error: {}", msg),
            MediaError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for MediaError {}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        MediaError::IoError(e.to_string())
    }
}
