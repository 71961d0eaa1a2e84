//! Audio encoding, the independent audio file, and microphone capture
//!
//! - `encoder`: Opus encoding for the muxed audio track (libopus)
//! - `aac`: AAC-LC encoding for the independent audio file (fdk-aac)
//! - `m4a`: audio-only MP4 container
//! - `sink`: standalone audio file for the independent-file policy
//! - `capture`: microphone capture via cpal (feature `microphone`)

#[cfg(feature = "microphone")]
mod capture;
mod aac;
mod encoder;
mod m4a;
mod sink;

#[cfg(feature = "microphone")]
pub use capture::AudioCapture;
pub use aac::{aac_bitrate, AacEncoder, AacPacket};
pub use encoder::{EncodedAudio, OpusEncoder, OPUS_FRAME_SAMPLES};
pub use m4a::{M4aTrack, M4aWriter};
pub use sink::{remix, AudioConverter, AudioSink, AudioSinkConfig, AudioSinkStats, ChunkResampler};
