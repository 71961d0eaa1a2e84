//! Opus encoder for the muxed audio track
//!
//! Buffers interleaved f32 PCM until a full 20 ms frame is available and
//! emits raw Opus packets stamped on the container timeline.

use crate::errors::MediaError;
use crate::types::AudioSample;

/// Samples per channel in one 20 ms Opus frame at 48 kHz
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_AUDIO from opus.h
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus will produce for one frame
const MAX_PACKET_BYTES: usize = 4000;

/// Encoded Opus audio packet
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    /// Raw Opus packet data
    pub data: Vec<u8>,
    /// Presentation timestamp in seconds, relative to the container origin
    pub timestamp: f64,
    /// Duration of this packet in seconds
    pub duration: f64,
}

/// Opus encoder for PCM to Opus conversion
///
/// The libopus state is not thread-safe; the encoder is `Send` so it can live
/// on the muxer's writer thread, and is never shared.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_rate: u32,
    sample_buffer: Vec<f32>,
    /// Timestamp of the first sample currently held in `sample_buffer`
    buffer_pts: Option<f64>,
    packets_encoded: u64,
}

// SAFETY: the raw encoder pointer is owned exclusively by this value, libopus
// encoders may be used from any single thread, and the type is not Sync.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    /// Create a new Opus encoder
    ///
    /// `sample_rate` must be 48000 and `channels` 1 or 2.
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> Result<Self, MediaError> {
        if sample_rate != 48000 {
            return Err(MediaError::AudioError("Opus requires 48000 Hz sample rate".to_string()));
        }

        if channels != 1 && channels != 2 {
            return Err(MediaError::AudioError(
                "Opus supports only mono (1) or stereo (2) channels".to_string(),
            ));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                sample_rate as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };

        if encoder.is_null() || error != 0 {
            return Err(MediaError::AudioError(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };

        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(MediaError::AudioError(format!(
                "Failed to set bitrate: error code {}",
                result
            )));
        }

        Ok(Self {
            encoder,
            channels,
            sample_rate,
            sample_buffer: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
            buffer_pts: None,
            packets_encoded: 0,
        })
    }

    /// Encode an audio buffer placed at `pts` seconds on the container timeline.
    ///
    /// Returns zero or more complete packets; a partial frame stays buffered.
    pub fn encode(&mut self, sample: &AudioSample, pts: f64) -> Result<Vec<EncodedAudio>, MediaError> {
        if sample.sample_rate != self.sample_rate {
            return Err(MediaError::AudioError(format!(
                "Sample rate mismatch: expected {}, got {}",
                self.sample_rate, sample.sample_rate
            )));
        }

        if sample.channels != self.channels {
            return Err(MediaError::AudioError(format!(
                "Channel count mismatch: expected {}, got {}",
                self.channels, sample.channels
            )));
        }

        if sample.samples.is_empty() {
            return Ok(Vec::new());
        }

        if self.sample_buffer.is_empty() {
            self.buffer_pts = Some(pts);
        }
        self.sample_buffer.extend_from_slice(&sample.samples);

        self.drain_frames()
    }

    /// Zero-pad and encode whatever is left in the buffer
    pub fn flush(&mut self) -> Result<Vec<EncodedAudio>, MediaError> {
        if self.sample_buffer.is_empty() {
            return Ok(Vec::new());
        }

        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let remainder = self.sample_buffer.len() % samples_per_frame;
        if remainder != 0 {
            self.sample_buffer
                .resize(self.sample_buffer.len() + samples_per_frame - remainder, 0.0);
        }

        self.drain_frames()
    }

    fn drain_frames(&mut self) -> Result<Vec<EncodedAudio>, MediaError> {
        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let frame_duration = OPUS_FRAME_SAMPLES as f64 / self.sample_rate as f64;
        let mut packets = Vec::new();

        while self.sample_buffer.len() >= samples_per_frame {
            let frame_samples: Vec<f32> = self.sample_buffer.drain(..samples_per_frame).collect();
            let pts = self.buffer_pts.unwrap_or(0.0);

            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    frame_samples.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };

            if len < 0 {
                return Err(MediaError::AudioError(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }

            output.truncate(len as usize);
            packets.push(EncodedAudio {
                data: output,
                timestamp: pts,
                duration: frame_duration,
            });

            self.packets_encoded += 1;
            self.buffer_pts = Some(pts + frame_duration);
        }

        if self.sample_buffer.is_empty() {
            self.buffer_pts = None;
        }

        Ok(packets)
    }

    pub fn packets_encoded(&self) -> u64 {
        self.packets_encoded
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe {
                libopus_sys::opus_encoder_destroy(self.encoder);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stereo(frames: usize) -> AudioSample {
        AudioSample {
            samples: vec![0.0f32; frames * 2],
            sample_rate: 48000,
            channels: 2,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn test_encoder_rejects_wrong_sample_rate() {
        assert!(OpusEncoder::new(44100, 2, 128000).is_err());
    }

    #[test]
    fn test_encoder_rejects_wrong_channels() {
        assert!(OpusEncoder::new(48000, 5, 128000).is_err());
    }

    #[test]
    fn test_encode_full_frame() {
        let mut encoder = OpusEncoder::new(48000, 2, 128000).unwrap();
        let packets = encoder.encode(&stereo(OPUS_FRAME_SAMPLES), 0.5).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].data.is_empty());
        assert!((packets[0].timestamp - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_partial_frame_is_buffered_then_flushed() {
        let mut encoder = OpusEncoder::new(48000, 2, 128000).unwrap();
        assert!(encoder.encode(&stereo(100), 0.0).unwrap().is_empty());
        assert_eq!(encoder.flush().unwrap().len(), 1);
        assert!(encoder.flush().unwrap().is_empty());
    }

    #[test]
    fn test_packet_timestamps_advance_by_frame() {
        let mut encoder = OpusEncoder::new(48000, 2, 128000).unwrap();
        let packets = encoder.encode(&stereo(OPUS_FRAME_SAMPLES * 3), 1.0).unwrap();
        assert_eq!(packets.len(), 3);
        assert!((packets[1].timestamp - 1.02).abs() < 1e-9);
        assert!((packets[2].timestamp - 1.04).abs() < 1e-9);
    }

    #[test]
    fn test_gap_restarts_timestamps() {
        let mut encoder = OpusEncoder::new(48000, 2, 128000).unwrap();
        encoder.encode(&stereo(OPUS_FRAME_SAMPLES), 0.0).unwrap();
        // A buffer after a gap starts at its own timestamp
        let packets = encoder.encode(&stereo(OPUS_FRAME_SAMPLES), 2.0).unwrap();
        assert!((packets[0].timestamp - 2.0).abs() < 1e-9);
    }
}
