//! Track writers: the encoding and container layer behind the muxer
//!
//! The muxer owns timing, ordering and backpressure; a `TrackWriter` only
//! turns already-rebased samples into bytes in a container file.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use muxide::api::{AudioCodec, Metadata, MuxerBuilder, VideoCodec};

use super::config::{RecordingConfig, WriterStats};
use super::encoder::H264Encoder;
use crate::audio::{EncodedAudio, OpusEncoder};
use crate::errors::MediaError;
use crate::types::{AudioSample, VideoFrame};

/// Encodes samples and writes them into one container file.
///
/// Timestamps passed in are seconds relative to the container origin and
/// non-decreasing per track.
pub trait TrackWriter: Send {
    fn write_video(&mut self, pts: f64, frame: &VideoFrame) -> Result<(), MediaError>;

    fn write_audio(&mut self, pts: f64, sample: &AudioSample) -> Result<(), MediaError>;

    /// Flush pending samples and close the container
    fn finish(self: Box<Self>) -> Result<WriterStats, MediaError>;
}

/// Opens track writers for new recordings
pub trait WriterFactory: Send + Sync {
    fn create(&self, path: &Path, config: &RecordingConfig) -> Result<Box<dyn TrackWriter>, MediaError>;
}

/// H.264 + Opus in MP4, via openh264, libopus and muxide
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4WriterFactory;

impl WriterFactory for Mp4WriterFactory {
    fn create(&self, path: &Path, config: &RecordingConfig) -> Result<Box<dyn TrackWriter>, MediaError> {
        Ok(Box::new(Mp4TrackWriter::create(path, config)?))
    }
}

/// MP4 writer with an H.264 video track and an optional Opus audio track
pub struct Mp4TrackWriter {
    video: H264Encoder,
    audio: Option<OpusEncoder>,
    muxer: muxide::api::Muxer<BufWriter<File>>,
    video_written: u64,
    last_video_pts: f64,
    last_audio_pts: f64,
    /// Audio packets that arrived before the first video keyframe
    held_audio: Vec<EncodedAudio>,
}

impl Mp4TrackWriter {
    pub fn create(path: &Path, config: &RecordingConfig) -> Result<Self, MediaError> {
        let video = H264Encoder::new(config.width, config.height, config.fps, config.bitrate)?;

        let audio = match config.audio {
            Some(audio) => Some(OpusEncoder::new(audio.sample_rate, audio.channels, audio.bitrate)?),
            None => None,
        };

        let file = File::create(path)
            .map_err(|e| MediaError::IoError(format!("Failed to create output file {}: {}", path.display(), e)))?;
        let writer = BufWriter::new(file);

        let mut builder = MuxerBuilder::new(writer)
            .video(VideoCodec::H264, config.width, config.height, config.fps)
            .with_fast_start(config.fast_start);

        if let Some(audio) = config.audio {
            builder = builder.audio(AudioCodec::Opus, audio.sample_rate, audio.channels);
        }

        let metadata = match config.title {
            Some(ref title) => Metadata::new().with_title(title).with_current_time(),
            None => Metadata::new().with_current_time(),
        };
        builder = builder.with_metadata(metadata);

        let muxer = builder
            .build()
            .map_err(|e| MediaError::MuxingError(format!("Failed to create muxer: {}", e)))?;

        Ok(Self {
            video,
            audio,
            muxer,
            video_written: 0,
            last_video_pts: 0.0,
            last_audio_pts: 0.0,
            held_audio: Vec::new(),
        })
    }

    fn write_encoded_video(&mut self, pts: f64, data: &[u8], is_keyframe: bool) -> Result<(), MediaError> {
        self.muxer
            .write_video(pts, data, is_keyframe)
            .map_err(|e| MediaError::MuxingError(format!("Failed to write frame: {}", e)))?;
        self.video_written += 1;
        self.last_video_pts = pts;

        if !self.held_audio.is_empty() {
            let held = std::mem::take(&mut self.held_audio);
            self.write_packets(held)?;
        }
        Ok(())
    }

    fn write_packets(&mut self, packets: Vec<EncodedAudio>) -> Result<(), MediaError> {
        if self.video_written == 0 {
            self.held_audio.extend(packets);
            return Ok(());
        }
        for packet in packets {
            // Capture jitter can start a buffer inside the previous packet
            let pts = packet.timestamp.max(self.last_audio_pts);
            self.muxer
                .write_audio(pts, &packet.data)
                .map_err(|e| MediaError::MuxingError(format!("Failed to write audio: {}", e)))?;
            self.last_audio_pts = pts;
        }
        Ok(())
    }
}

impl TrackWriter for Mp4TrackWriter {
    fn write_video(&mut self, pts: f64, frame: &VideoFrame) -> Result<(), MediaError> {
        if self.video_written == 0 {
            self.video.force_keyframe();
        }

        let encoded = self.video.encode_frame(frame)?;

        // The encoder may skip a picture under rate control
        if encoded.data.is_empty() {
            log::debug!("Encoder produced no data for frame at {:.3}s", pts);
            return Ok(());
        }

        self.write_encoded_video(pts, &encoded.data, encoded.is_keyframe)
    }

    fn write_audio(&mut self, pts: f64, sample: &AudioSample) -> Result<(), MediaError> {
        let encoder = self
            .audio
            .as_mut()
            .ok_or_else(|| MediaError::MuxingError("Recording has no audio track".to_string()))?;

        let packets = encoder.encode(sample, pts)?;
        self.write_packets(packets)
    }

    fn finish(mut self: Box<Self>) -> Result<WriterStats, MediaError> {
        if self.video_written == 0 {
            // Stopped before any frame arrived: leave a minimal, playable file
            let black = self.video.encode_black()?;
            self.write_encoded_video(0.0, &black.data, true)?;
        }

        if let Some(encoder) = self.audio.as_mut() {
            let tail = encoder.flush()?;
            self.write_packets(tail)?;
        }

        let this = *self;
        let stats = this
            .muxer
            .finish_with_stats()
            .map_err(|e| MediaError::MuxingError(format!("Failed to finalize recording: {}", e)))?;

        Ok(WriterStats {
            video_frames: stats.video_frames,
            audio_frames: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        })
    }
}
