//! Recording configuration types

use serde::{Deserialize, Serialize};

/// How audio is combined with the screen recording.
///
/// Exactly one audio path is active per session: the muxer's audio track
/// for `MuxedTrack`, the standalone audio sink for `IndependentFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPolicy {
    /// Video only
    None,
    /// Audio is a second track of the same container, on the shared time origin
    MuxedTrack,
    /// Audio is written to its own file, not synchronized with the container
    IndependentFile,
}

impl AudioPolicy {
    pub fn includes_audio(&self) -> bool {
        !matches!(self, AudioPolicy::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioPolicy::None => "none",
            AudioPolicy::MuxedTrack => "muxed_track",
            AudioPolicy::IndependentFile => "independent_file",
        }
    }
}

impl std::str::FromStr for AudioPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "off" => Ok(AudioPolicy::None),
            "muxed" | "muxed_track" => Ok(AudioPolicy::MuxedTrack),
            "independent" | "independent_file" => Ok(AudioPolicy::IndependentFile),
            other => Err(format!("unknown audio policy: {}", other)),
        }
    }
}

/// Opus track parameters for `AudioPolicy::MuxedTrack`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxedAudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl Default for MuxedAudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bitrate: 128_000,
        }
    }
}

/// Configuration for one container file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: f64,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Enable fast-start for web streaming (moov before mdat)
    pub fast_start: bool,
    /// Optional title metadata
    pub title: Option<String>,
    /// Muxed audio track, if any
    pub audio: Option<MuxedAudioConfig>,
    /// Bounded depth of the video track queue
    pub video_queue_capacity: usize,
    /// Bounded depth of the audio track queue
    pub audio_queue_capacity: usize,
}

impl RecordingConfig {
    /// Create a video-only configuration with explicit dimensions
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate: 2_500_000,
            fast_start: true,
            title: None,
            audio: None,
            video_queue_capacity: 8,
            audio_queue_capacity: 64,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_fast_start(mut self, enabled: bool) -> Self {
        self.fast_start = enabled;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Add a muxed audio track
    pub fn with_audio(mut self, audio: MuxedAudioConfig) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_queue_capacity(mut self, video: usize, audio: usize) -> Self {
        self.video_queue_capacity = video.max(1);
        self.audio_queue_capacity = audio.max(1);
        self
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Totals reported by a track writer when it closes the container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriterStats {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
}

/// Statistics returned after finishing a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Video samples written to the container
    pub video_frames: u64,
    /// Audio packets written to the container
    pub audio_frames: u64,
    /// Container duration in seconds
    pub duration_secs: f64,
    /// Total bytes written to the container
    pub bytes_written: u64,
    /// Frames refused because the video track was not ready
    pub dropped_frames: u64,
    /// Audio buffers refused because the audio track was not ready
    pub dropped_audio: u64,
    /// Samples refused for arriving before the origin or out of order
    pub late_samples: u64,
    /// Source timestamp that became container time zero
    pub origin_secs: Option<f64>,
    /// Output file path
    pub output_path: String,
}

impl RecordingStats {
    /// Average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.bytes_written as f64 * 8.0) / self.duration_secs
        } else {
            0.0
        }
    }
}
