//! Property-Based Tests for the Recording Codecs
//!
//! These tests verify invariants of the pixel conversion and the H.264 and
//! Opus encoders using proptest for input generation and shrinking.
//!
//! Run with: cargo test --test recording_props

use std::time::Duration;

use proptest::prelude::*;

use crabscreen::audio::{OpusEncoder, OPUS_FRAME_SAMPLES};
use crabscreen::recording::{argb_to_yuv420, H264Encoder};
use crabscreen::testing::{synthetic_audio_sample, synthetic_video_frame};
use crabscreen::types::{PixelFormat, VideoFrame};

// ═══════════════════════════════════════════════════════════════════════════
// PIXEL CONVERSION INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: I420 output is exactly 1.5 bytes per pixel
    #[test]
    fn yuv_size_matches_geometry(
        width in (1u32..64).prop_map(|w| w * 2),
        height in (1u32..64).prop_map(|h| h * 2),
    ) {
        let argb = vec![0x80u8; (width * height * 4) as usize];
        let yuv = argb_to_yuv420(&argb, width, height);
        prop_assert_eq!(yuv.len(), (width * height * 3 / 2) as usize);
    }

    /// INVARIANT: a uniform gray picture keeps neutral chroma
    #[test]
    fn gray_has_neutral_chroma(level in 0u8..=255) {
        let (width, height) = (16u32, 16u32);
        let mut argb = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            argb.extend_from_slice(&[0xFF, level, level, level]);
        }
        let yuv = argb_to_yuv420(&argb, width, height);
        let y_size = (width * height) as usize;
        for chroma in &yuv[y_size..] {
            prop_assert!((*chroma as i32 - 128).abs() <= 1, "chroma {} for gray {}", chroma, level);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// H264 ENCODER INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// INVARIANT: Encoder accepts even dimensions
    #[test]
    fn encoder_accepts_even_dimensions(
        width in (8u32..200).prop_map(|w| w * 2),
        height in (8u32..120).prop_map(|h| h * 2),
        fps in 15.0f64..60.0,
    ) {
        let result = H264Encoder::new(width, height, fps, 2_000_000);
        prop_assert!(result.is_ok(), "Encoder should accept {}x{}: {:?}", width, height, result.err());
    }

    /// INVARIANT: Encoder rejects odd dimensions
    #[test]
    fn encoder_rejects_odd_dimensions(width in 1u32..400, height in 1u32..400) {
        prop_assume!(width % 2 == 1 || height % 2 == 1);
        prop_assert!(H264Encoder::new(width, height, 30.0, 2_000_000).is_err());
    }

    /// INVARIANT: Encoded frames are Annex B and the first is a keyframe
    #[test]
    fn first_frame_is_annex_b_keyframe(frame_number in 0u64..1000) {
        let (width, height) = (160u32, 128u32);
        let mut encoder = H264Encoder::new(width, height, 30.0, 1_000_000).expect("Encoder creation");
        let frame = synthetic_video_frame(frame_number, width, height, Duration::ZERO);
        let encoded = encoder.encode_frame(&frame).expect("Encoding should succeed");

        prop_assert!(encoded.is_keyframe);
        prop_assert!(
            encoded.data.starts_with(&[0, 0, 0, 1]) || encoded.data.starts_with(&[0, 0, 1]),
            "expected Annex B start code, got {:02x?}",
            &encoded.data[..encoded.data.len().min(8)]
        );
    }
}

#[test]
fn encoder_rejects_mismatched_frames() {
    let mut encoder = H264Encoder::new(160, 128, 30.0, 1_000_000).unwrap();
    let wrong_size = synthetic_video_frame(0, 320, 240, Duration::ZERO);
    assert!(encoder.encode_frame(&wrong_size).is_err());

    let truncated = VideoFrame::new(vec![0; 100], 160, 128, PixelFormat::Argb32, Duration::ZERO);
    assert!(encoder.encode_frame(&truncated).is_err());
}

#[test]
fn black_frame_is_a_keyframe() {
    let mut encoder = H264Encoder::new(160, 128, 30.0, 1_000_000).unwrap();
    let black = encoder.encode_black().unwrap();
    assert!(black.is_keyframe);
    assert!(!black.data.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// OPUS ENCODER INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// INVARIANT: every full 20 ms of input yields exactly one packet
    #[test]
    fn opus_packets_follow_input_length(chunks in prop::collection::vec(1usize..3000, 1..10)) {
        let mut encoder = OpusEncoder::new(48000, 2, 128_000).unwrap();
        let mut total_frames = 0usize;
        let mut packets = Vec::new();

        for (i, frames) in chunks.iter().enumerate() {
            let pts = total_frames as f64 / 48000.0;
            let sample = synthetic_audio_sample(i as u64, *frames, 2, Duration::ZERO);
            packets.extend(encoder.encode(&sample, pts).unwrap());
            total_frames += frames;
        }

        prop_assert_eq!(packets.len(), total_frames / OPUS_FRAME_SAMPLES);
        prop_assert!(packets.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        prop_assert!(packets.iter().all(|p| !p.data.is_empty() && (p.duration - 0.02).abs() < 1e-9));
    }
}

#[test]
fn opus_rejects_unsupported_formats() {
    assert!(OpusEncoder::new(44100, 2, 128_000).is_err());
    assert!(OpusEncoder::new(48000, 6, 128_000).is_err());

    let mut encoder = OpusEncoder::new(48000, 2, 128_000).unwrap();
    let mono = synthetic_audio_sample(0, 960, 1, Duration::ZERO);
    assert!(encoder.encode(&mono, 0.0).is_err());
}
