//! Capture sources
//!
//! A `FrameSource` wraps a live-capture facility. Once started it pushes
//! frames and audio into a `FrameSink` from its own thread until it is
//! stopped or hits a fatal error. Delivery never blocks: the sink answers
//! each sample with a `Delivery` and a dropped sample is not retried.

use std::sync::Arc;

use crate::errors::MediaError;
use crate::types::{AudioSample, VideoFrame};

#[cfg(feature = "microphone")]
mod microphone;
mod push;
mod synthetic;

#[cfg(feature = "microphone")]
pub use microphone::MicrophoneSource;
pub use push::{PushHandle, PushSource, StopMode};
pub use synthetic::{SyntheticConfig, SyntheticScreenSource};

/// Whether the consumer took a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// Not taken (queue full, late, or no session); the producer moves on
    Dropped,
}

impl Delivery {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Delivery::Accepted)
    }
}

/// Receives everything a running source produces.
///
/// Called from the source's capture thread; implementations must not block.
pub trait FrameSink: Send + Sync {
    fn on_video(&self, frame: VideoFrame) -> Delivery;

    fn on_audio(&self, sample: AudioSample) -> Delivery;

    /// Fatal capture error. No further samples or halt confirmation follow.
    fn on_error(&self, error: MediaError);

    /// Halt confirmation for an explicit `stop`, delivered once
    fn on_stopped(&self);
}

/// A live-capture facility that can be started and stopped
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Register `sink` and begin delivery.
    ///
    /// Returns once capture is set up; samples arrive asynchronously. An error
    /// here means the facility refused to start and nothing will be delivered.
    fn start(&mut self, sink: Arc<dyn FrameSink>, with_audio: bool) -> Result<(), MediaError>;

    /// Request a halt without waiting for it; `FrameSink::on_stopped` confirms.
    /// Stopping an idle source does nothing.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
