//! Sample types flowing from a capture source into the muxer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixel layout of a captured video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 32-bit ARGB, one byte per channel, alpha first
    Argb32,
    /// 24-bit packed RGB
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Argb32 => 4,
            PixelFormat::Rgb24 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Argb32 => "argb32",
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

/// Logical stream inside the output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    pub(crate) fn index(self) -> usize {
        match self {
            Track::Video => 0,
            Track::Audio => 1,
        }
    }
}

/// A single captured screen image.
///
/// `timestamp` is the capture source's monotonic presentation time; it is not
/// expected to start at zero.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Duration,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, timestamp: Duration) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp,
        }
    }

    /// Number of bytes a well-formed frame of this geometry carries
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

/// A buffer of interleaved f32 PCM audio with its presentation time
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Duration,
}

impl AudioSample {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration covered by this buffer
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}
