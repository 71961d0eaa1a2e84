//! Capture session lifecycle
//!
//! `SessionController` owns the single active recording and mediates between
//! a `FrameSource` and the `Muxer` (or the independent `AudioSink`).
//!
//! # Example
//! ```rust,ignore
//! use crabscreen::config::RecorderConfig;
//! use crabscreen::session::SessionController;
//! use crabscreen::source::{SyntheticConfig, SyntheticScreenSource};
//!
//! let config = RecorderConfig::default();
//! let source = SyntheticScreenSource::new(SyntheticConfig::from_recorder(&config));
//! let controller = SessionController::with_mp4(config, Box::new(source));
//!
//! controller.start("clip1", false)?;
//! // ... frames are delivered by the source ...
//! let result = controller.stop().await?;
//! println!("{}", result.output_path.display());
//! ```

mod controller;
mod errors;
mod state;

pub use controller::{RecordingResult, SessionController, SessionInfo, StartRequest};
pub use errors::{RecordingError, RecordingErrorKind};
pub use state::SessionState;
