//! Configuration management for CrabScreen
//!
//! Provides loading, saving and validation of the recorder settings: video
//! geometry and bitrate, the audio policy, where output files land, and the
//! pipeline's queue depths and timeouts.

use crate::audio::AudioSinkConfig;
use crate::errors::MediaError;
use crate::recording::{AudioPolicy, MuxedAudioConfig, RecordingConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

/// Video track configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Nominal frames per second
    pub fps: f64,
    /// Target H.264 bitrate in bits per second
    pub bitrate: u32,
}

/// Quality preset for the independent audio file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Low,
    Medium,
    High,
}

/// Audio configuration for both audio policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Policy applied when a caller asks for audio without naming one
    pub policy: AudioPolicy,
    /// Sample rate of the muxed Opus track (Opus requires 48000)
    pub muxed_sample_rate: u32,
    /// Channel count of the muxed Opus track
    pub muxed_channels: u16,
    /// Opus bitrate in bits per second
    pub muxed_bitrate: u32,
    /// Sample rate of the independent audio file
    pub sink_sample_rate: u32,
    /// Channel count of the independent audio file
    pub sink_channels: u16,
    /// AAC bitrate preset of the independent audio file
    pub sink_quality: AudioQuality,
}

/// Output file placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for recordings; the system temp directory when unset
    pub output_directory: Option<PathBuf>,
    /// Container file extension appended to the session name
    pub container_extension: String,
    /// Session-scoped file name of the independent audio file
    pub audio_file_name: String,
}

/// Pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames the video track buffers before reporting not-ready
    pub video_queue_capacity: usize,
    /// Audio buffers the audio track holds before reporting not-ready
    pub audio_queue_capacity: usize,
    /// How long `stop` waits for the source's halt confirmation
    pub stop_timeout_ms: u64,
    /// Write the moov box before mdat
    pub fast_start: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig {
                width: 1280,
                height: 720,
                fps: 30.0,
                bitrate: 2_500_000,
            },
            audio: AudioConfig {
                policy: AudioPolicy::MuxedTrack,
                muxed_sample_rate: 48000,
                muxed_channels: 2,
                muxed_bitrate: 128_000,
                sink_sample_rate: 12000,
                sink_channels: 1,
                sink_quality: AudioQuality::High,
            },
            storage: StorageConfig {
                output_directory: None,
                container_extension: "mp4".to_string(),
                audio_file_name: "audio.m4a".to_string(),
            },
            pipeline: PipelineConfig {
                video_queue_capacity: 8,
                audio_queue_capacity: 64,
                stop_timeout_ms: 5000,
                fast_start: true,
            },
        }
    }
}

impl RecorderConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, MediaError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| MediaError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: RecorderConfig = toml::from_str(&contents)
            .map_err(|e| MediaError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(MediaError::ConfigError)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MediaError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    MediaError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| MediaError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| MediaError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("crabscreen.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err("Invalid video resolution".to_string());
        }
        if self.video.width % 2 != 0 || self.video.height % 2 != 0 {
            return Err("Video resolution must be even for 4:2:0 encoding".to_string());
        }
        if !(self.video.fps > 0.0 && self.video.fps <= 240.0) {
            return Err("Invalid video FPS (must be in (0, 240])".to_string());
        }
        if self.video.bitrate == 0 {
            return Err("Video bitrate must be positive".to_string());
        }

        if self.audio.muxed_sample_rate != 48000 {
            return Err("Muxed audio track requires a 48000 Hz sample rate".to_string());
        }
        if !(1..=2).contains(&self.audio.muxed_channels) {
            return Err("Muxed audio track must be mono or stereo".to_string());
        }
        if self.audio.sink_sample_rate == 0 {
            return Err("Audio file sample rate must be positive".to_string());
        }
        if !(1..=2).contains(&self.audio.sink_channels) {
            return Err("Audio file must be mono or stereo".to_string());
        }

        if self.storage.container_extension.is_empty()
            || self.storage.container_extension.contains(&['/', '\\', '.'][..])
        {
            return Err("Container extension must be a bare extension such as \"mp4\"".to_string());
        }
        if self.storage.audio_file_name.is_empty() || self.storage.audio_file_name.contains(&['/', '\\'][..]) {
            return Err("Audio file name must be a plain file name".to_string());
        }

        if self.pipeline.video_queue_capacity == 0 || self.pipeline.audio_queue_capacity == 0 {
            return Err("Queue capacities must be at least 1".to_string());
        }
        if self.pipeline.stop_timeout_ms == 0 {
            return Err("Stop timeout must be positive".to_string());
        }

        Ok(())
    }

    /// Directory recordings are written to
    pub fn output_directory(&self) -> PathBuf {
        self.storage
            .output_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Container path for a session name
    pub fn container_path(&self, name: &str) -> PathBuf {
        self.output_directory()
            .join(format!("{}.{}", name, self.storage.container_extension))
    }

    /// Path of the independent audio file
    pub fn audio_file_path(&self) -> PathBuf {
        self.output_directory().join(&self.storage.audio_file_name)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.stop_timeout_ms)
    }

    /// Format of the independent audio file
    pub fn sink_config(&self) -> AudioSinkConfig {
        AudioSinkConfig {
            sample_rate: self.audio.sink_sample_rate,
            channels: self.audio.sink_channels,
            quality: self.audio.sink_quality,
        }
    }

    /// Build the per-session writer configuration
    pub fn recording_config(&self, policy: AudioPolicy, title: Option<String>) -> RecordingConfig {
        let mut config = RecordingConfig::new(self.video.width, self.video.height, self.video.fps)
            .with_bitrate(self.video.bitrate)
            .with_fast_start(self.pipeline.fast_start)
            .with_queue_capacity(self.pipeline.video_queue_capacity, self.pipeline.audio_queue_capacity);

        if policy == AudioPolicy::MuxedTrack {
            config = config.with_audio(MuxedAudioConfig {
                sample_rate: self.audio.muxed_sample_rate,
                channels: self.audio.muxed_channels,
                bitrate: self.audio.muxed_bitrate,
            });
        }

        if let Some(title) = title {
            config = config.with_title(title);
        }

        config
    }
}
