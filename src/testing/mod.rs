//! Testing utilities for CrabScreen
//!
//! Synthetic capture data and an in-memory track writer, so the pipeline can
//! be exercised without a display, a microphone or codec output.

pub mod memory_writer;
pub mod synthetic_data;

pub use memory_writer::{MemoryWriterFactory, WriteEvent};
pub use synthetic_data::{synthetic_audio_sample, synthetic_video_frame, SYNTHETIC_SAMPLE_RATE};
