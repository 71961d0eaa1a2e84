//! Synthetic screen and microphone data
//!
//! Frames carry a moving gradient so successive pictures differ and the
//! encoder produces real P-frames; audio is a 440 Hz tone.

use std::time::Duration;

use crate::types::{AudioSample, PixelFormat, VideoFrame};

/// Rate used for synthetic audio, matching the muxed Opus track
pub const SYNTHETIC_SAMPLE_RATE: u32 = 48000;

/// Create a 32-bit ARGB frame whose content depends on `frame_number`
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32, timestamp: Duration) -> VideoFrame {
    let mut data = vec![0u8; (width * height * 4) as usize];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 4) as usize;
            data[idx] = 0xFF;
            data[idx + 1] = base.wrapping_add((x % 256) as u8);
            data[idx + 2] = base.wrapping_add((y % 256) as u8);
            data[idx + 3] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    VideoFrame::new(data, width, height, PixelFormat::Argb32, timestamp)
}

/// Create interleaved sine-wave audio
///
/// `chunk_index` selects the position in the tone so consecutive chunks are
/// phase-continuous.
pub fn synthetic_audio_sample(chunk_index: u64, frames_per_chunk: usize, channels: u16, timestamp: Duration) -> AudioSample {
    let sample_rate = SYNTHETIC_SAMPLE_RATE as f64;
    let frequency = 440.0;
    let ch = channels.max(1) as usize;

    let mut samples = vec![0.0f32; frames_per_chunk * ch];
    for i in 0..frames_per_chunk {
        let t = (chunk_index as f64 * frames_per_chunk as f64 + i as f64) / sample_rate;
        let value = (2.0 * std::f64::consts::PI * frequency * t).sin() as f32 * 0.3;
        for c in 0..ch {
            samples[i * ch + c] = value;
        }
    }

    AudioSample {
        samples,
        sample_rate: SYNTHETIC_SAMPLE_RATE,
        channels: ch as u16,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frame_is_valid_argb() {
        let frame = synthetic_video_frame(3, 64, 48, Duration::from_millis(100));
        assert!(frame.is_valid());
        assert_eq!(frame.format, PixelFormat::Argb32);
        assert_eq!(frame.data[0], 0xFF);
    }

    #[test]
    fn test_frames_differ() {
        let a = synthetic_video_frame(0, 16, 16, Duration::ZERO);
        let b = synthetic_video_frame(1, 16, 16, Duration::ZERO);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_audio_chunk_shape() {
        let sample = synthetic_audio_sample(0, 960, 2, Duration::ZERO);
        assert_eq!(sample.frames(), 960);
        assert_eq!(sample.duration(), Duration::from_millis(20));
        assert!(sample.samples.iter().all(|s| s.abs() <= 0.3));
    }
}
