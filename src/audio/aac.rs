//! AAC-LC encoder for the independent audio file
//!
//! Wraps the Fraunhofer FDK encoder in raw transport mode: every packet is
//! one access unit of `frame_length` samples per channel, ready for an MP4
//! sample table.

use fdk_aac::enc::{AudioObjectType, BitRate, ChannelMode, EncodeInfo, Encoder, EncoderParams, Transport};

use crate::config::AudioQuality;
use crate::errors::MediaError;

/// Fixed bitrate for each quality preset, in bits per second per channel
pub fn aac_bitrate(quality: AudioQuality) -> u32 {
    match quality {
        AudioQuality::Low => 12_000,
        AudioQuality::Medium => 20_000,
        AudioQuality::High => 32_000,
    }
}

/// One AAC access unit
#[derive(Debug, Clone)]
pub struct AacPacket {
    pub data: Vec<u8>,
}

pub struct AacEncoder {
    encoder: Encoder,
    channels: u16,
    sample_rate: u32,
    frame_length: usize,
    delay: usize,
    audio_specific_config: Vec<u8>,
    out_buf: Vec<u8>,
    frames_in: u64,
    packets_out: u64,
}

// SAFETY: the FDK handle is owned exclusively by this value and the encoder
// is only ever driven from one thread at a time; the type is not Sync.
unsafe impl Send for AacEncoder {}

impl AacEncoder {
    /// Create a constant-bitrate AAC-LC encoder for `channels` (1 or 2)
    pub fn new(sample_rate: u32, channels: u16, quality: AudioQuality) -> Result<Self, MediaError> {
        let mode = match channels {
            1 => ChannelMode::Mono,
            2 => ChannelMode::Stereo,
            n => {
                return Err(MediaError::AudioError(format!(
                    "AAC encoder supports mono or stereo, got {} channels",
                    n
                )))
            }
        };

        let encoder = Encoder::new(EncoderParams {
            bit_rate: BitRate::Cbr(aac_bitrate(quality) * channels as u32),
            sample_rate,
            transport: Transport::Raw,
            channels: mode,
            audio_object_type: AudioObjectType::Mpeg4LowComplexity,
        })
        .map_err(|e| MediaError::AudioError(format!("Failed to create AAC encoder at {} Hz: {:?}", sample_rate, e)))?;

        let info = encoder
            .info()
            .map_err(|e| MediaError::AudioError(format!("Failed to query AAC encoder: {:?}", e)))?;
        let config_len = (info.confSize as usize).min(info.confBuf.len());
        if config_len == 0 {
            return Err(MediaError::AudioError("AAC encoder produced no AudioSpecificConfig".to_string()));
        }

        log::debug!(
            "AAC encoder: {} Hz, {} ch, {:?}, frame {} samples, delay {}",
            sample_rate,
            channels,
            quality,
            info.frameLength,
            info.nDelay
        );

        Ok(Self {
            encoder,
            channels,
            sample_rate,
            frame_length: info.frameLength as usize,
            delay: info.nDelay as usize,
            audio_specific_config: info.confBuf[..config_len].to_vec(),
            out_buf: vec![0; (info.maxOutBufBytes as usize).max(8192)],
            frames_in: 0,
            packets_out: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples per channel in one access unit
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Priming samples per channel at the start of the stream
    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Decoder configuration for the `esds` box
    pub fn audio_specific_config(&self) -> &[u8] {
        &self.audio_specific_config
    }

    /// Sample frames accepted so far
    pub fn frames_in(&self) -> u64 {
        self.frames_in
    }

    /// Encode interleaved f32 PCM, returning any completed access units
    pub fn encode(&mut self, samples: &[f32]) -> Result<Vec<AacPacket>, MediaError> {
        let pcm: Vec<i16> = samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
            .collect();
        self.frames_in += (pcm.len() / self.channels as usize) as u64;
        self.push(&pcm)
    }

    /// Feed silence until every accepted frame, priming included, is encoded
    pub fn finish(&mut self) -> Result<Vec<AacPacket>, MediaError> {
        let needed = (self.frames_in + self.delay as u64).div_ceil(self.frame_length as u64);
        let silence = vec![0i16; self.frame_length * self.channels as usize];
        let mut packets = Vec::new();

        // The encoder holds back at most a few frames of lookahead
        for _ in 0..8 {
            if self.packets_out >= needed {
                break;
            }
            packets.extend(self.push(&silence)?);
        }

        // Anything past the last needed unit is padding
        let excess = self.packets_out.saturating_sub(needed) as usize;
        packets.truncate(packets.len().saturating_sub(excess));
        self.packets_out = self.packets_out.min(needed);
        Ok(packets)
    }

    fn push(&mut self, mut pcm: &[i16]) -> Result<Vec<AacPacket>, MediaError> {
        let mut packets = Vec::new();
        while !pcm.is_empty() {
            let EncodeInfo {
                input_consumed,
                output_size,
            } = self
                .encoder
                .encode(pcm, &mut self.out_buf)
                .map_err(|e| MediaError::AudioError(format!("AAC encoding failed: {:?}", e)))?;

            if output_size > 0 {
                packets.push(AacPacket {
                    data: self.out_buf[..output_size].to_vec(),
                });
                self.packets_out += 1;
            }
            if input_consumed == 0 && output_size == 0 {
                log::warn!("AAC encoder stalled with {} samples pending", pcm.len());
                break;
            }
            pcm = &pcm[input_consumed.min(pcm.len())..];
        }
        Ok(packets)
    }
}
