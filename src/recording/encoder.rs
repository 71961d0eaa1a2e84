//! H.264 encoder wrapper using openh264

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use crate::errors::MediaError;
use crate::types::{PixelFormat, VideoFrame};

/// H.264 encoder for fixed-geometry screen frames
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    /// Create a new H.264 encoder.
    ///
    /// openh264 takes the picture size from the YUV source at encode time; fps
    /// and bitrate stay with the caller's configuration.
    pub fn new(width: u32, height: u32, _fps: f64, _bitrate: u32) -> Result<Self, MediaError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(MediaError::EncodingError(format!(
                "Unsupported frame size {}x{}: dimensions must be even and non-zero",
                width, height
            )));
        }

        let encoder = Encoder::new()
            .map_err(|e| MediaError::EncodingError(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    /// Encode a captured frame, converting its pixels to I420 first
    pub fn encode_frame(&mut self, frame: &VideoFrame) -> Result<EncodedFrame, MediaError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(MediaError::EncodingError(format!(
                "Frame dimensions {}x{} don't match recording config {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if !frame.is_valid() {
            return Err(MediaError::EncodingError(format!(
                "Invalid frame size: expected {} bytes, got {}",
                frame.expected_len(),
                frame.data.len()
            )));
        }

        let yuv = match frame.format {
            PixelFormat::Argb32 => argb_to_yuv420(&frame.data, self.width, self.height),
            PixelFormat::Rgb24 => rgb_to_yuv420(&frame.data, self.width, self.height),
        };
        self.encode_yuv(yuv)
    }

    /// Encode an all-black picture, used to give an empty recording a keyframe
    pub fn encode_black(&mut self) -> Result<EncodedFrame, MediaError> {
        let y_size = (self.width * self.height) as usize;
        let mut yuv = vec![16u8; y_size + y_size / 2];
        yuv[y_size..].fill(128);
        self.force_keyframe();
        self.encode_yuv(yuv)
    }

    fn encode_yuv(&mut self, yuv_data: Vec<u8>) -> Result<EncodedFrame, MediaError> {
        let yuv_buffer = YUVBuffer::from_vec(yuv_data, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| MediaError::EncodingError(format!("Encoding failed: {}", e)))?;

        self.frame_count += 1;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

/// Result of encoding a single frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded H.264 data in Annex B format (with start codes)
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// Convert ARGB32 to YUV420 planar (BT.601, studio swing)
pub fn argb_to_yuv420(argb: &[u8], width: u32, height: u32) -> Vec<u8> {
    convert_to_yuv420(argb, width, height, 4, 1)
}

/// Convert RGB24 to YUV420 planar (BT.601, studio swing)
pub fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    convert_to_yuv420(rgb, width, height, 3, 0)
}

fn convert_to_yuv420(src: &[u8], width: u32, height: u32, stride: usize, red_offset: usize) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * stride + red_offset;
            let r = src[idx] as i32;
            let g = src[idx + 1] as i32;
            let b = src[idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // Chroma from the top-left pixel of each 2x2 block
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_argb_to_yuv420_size() {
        let argb = vec![255u8; 640 * 480 * 4];
        let yuv = argb_to_yuv420(&argb, 640, 480);
        assert_eq!(yuv.len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_argb_ignores_alpha() {
        // Opaque and transparent red must convert identically
        let opaque = [255u8, 255, 0, 0].repeat(4);
        let clear = [0u8, 255, 0, 0].repeat(4);
        assert_eq!(argb_to_yuv420(&opaque, 2, 2), argb_to_yuv420(&clear, 2, 2));
    }

    #[test]
    fn test_argb_matches_rgb() {
        let argb: Vec<u8> = [255u8, 10, 200, 30].repeat(16);
        let rgb: Vec<u8> = [10u8, 200, 30].repeat(16);
        assert_eq!(argb_to_yuv420(&argb, 4, 4), rgb_to_yuv420(&rgb, 4, 4));
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        assert!(H264Encoder::new(641, 480, 30.0, 1_000_000).is_err());
    }

    #[test]
    fn test_encode_frame() {
        let mut encoder = H264Encoder::new(320, 240, 30.0, 1_000_000).expect("Encoder creation failed");
        let frame = VideoFrame::new(vec![128u8; 320 * 240 * 4], 320, 240, PixelFormat::Argb32, Duration::ZERO);

        let encoded = encoder.encode_frame(&frame).expect("Encoding should succeed");
        assert!(!encoded.data.is_empty());
        assert!(
            encoded.data.starts_with(&[0x00, 0x00, 0x00, 0x01]) || encoded.data.starts_with(&[0x00, 0x00, 0x01]),
            "Should start with Annex B start code"
        );
        assert!(encoded.is_keyframe, "First frame should be a keyframe");
    }

    #[test]
    fn test_encode_rejects_mismatched_frame() {
        let mut encoder = H264Encoder::new(320, 240, 30.0, 1_000_000).unwrap();
        let frame = VideoFrame::new(vec![0u8; 160 * 120 * 4], 160, 120, PixelFormat::Argb32, Duration::ZERO);
        assert!(matches!(encoder.encode_frame(&frame), Err(MediaError::EncodingError(_))));
    }

    #[test]
    fn test_encode_black_is_keyframe() {
        let mut encoder = H264Encoder::new(320, 240, 30.0, 1_000_000).unwrap();
        let encoded = encoder.encode_black().unwrap();
        assert!(encoded.is_keyframe);
        assert_eq!(encoder.frame_count(), 1);
    }
}
