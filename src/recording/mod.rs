//! Screen recording pipeline: encoding, container writing and muxing
//!
//! - openh264 for H.264 encoding
//! - libopus for the muxed audio track
//! - muxide for MP4 muxing
//!
//! # Example
//! ```rust,ignore
//! use crabscreen::recording::{Muxer, Mp4WriterFactory, RecordingConfig};
//! use crabscreen::types::Track;
//!
//! let config = RecordingConfig::new(1280, 720, 30.0);
//! let mut muxer = Muxer::create("clip.mp4", config, &Mp4WriterFactory)?;
//! muxer.start_writing()?;
//!
//! // From the capture callback:
//! muxer.append_video(frame)?;
//!
//! // When capture has halted:
//! muxer.mark_all_finished();
//! let stats = muxer.finish()?;
//! ```

mod config;
mod encoder;
mod muxer;
mod writer;

pub use config::{AudioPolicy, MuxedAudioConfig, RecordingConfig, RecordingStats, WriterStats};
pub use encoder::{argb_to_yuv420, rgb_to_yuv420, EncodedFrame, H264Encoder};
pub use muxer::{AppendOutcome, Muxer};
pub use writer::{Mp4TrackWriter, Mp4WriterFactory, TrackWriter, WriterFactory};
