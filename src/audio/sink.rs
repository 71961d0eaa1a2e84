//! Independent audio file
//!
//! Records microphone audio to its own `.m4a` file, in parallel with the
//! video container and without reference to its timeline. Input is remixed
//! to the target channel count, resampled to the target rate with rubato and
//! encoded as AAC-LC at the bitrate of the quality preset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};

use super::aac::{aac_bitrate, AacEncoder, AacPacket};
use super::m4a::{M4aTrack, M4aWriter};
use crate::config::AudioQuality;
use crate::errors::MediaError;
use crate::types::AudioSample;

/// Output format of the independent audio file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSinkConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub quality: AudioQuality,
}

impl Default for AudioSinkConfig {
    /// Mono, 12 kHz, high quality
    fn default() -> Self {
        Self {
            sample_rate: 12000,
            channels: 1,
            quality: AudioQuality::High,
        }
    }
}

/// Totals for a closed audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSinkStats {
    pub frames_written: u64,
    pub packets_written: u64,
    pub duration_secs: f64,
    pub path: String,
}

/// Writes one session-scoped audio file
pub struct AudioSink {
    path: PathBuf,
    config: AudioSinkConfig,
    writer: Option<M4aWriter>,
    encoder: AacEncoder,
    converter: AudioConverter,
    stats: Option<AudioSinkStats>,
}

impl AudioSink {
    /// Create the file at `path` and start accepting audio
    pub fn create(path: impl AsRef<Path>, config: AudioSinkConfig) -> Result<Self, MediaError> {
        let path = path.as_ref().to_path_buf();
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(MediaError::AudioError(format!(
                "Invalid audio sink format: {} Hz, {} channels",
                config.sample_rate, config.channels
            )));
        }

        let encoder = AacEncoder::new(config.sample_rate, config.channels, config.quality)?;
        let track = M4aTrack {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_length: encoder.frame_length() as u32,
            priming: encoder.delay() as u32,
            audio_specific_config: encoder.audio_specific_config().to_vec(),
            bitrate: aac_bitrate(config.quality) * config.channels as u32,
        };
        let writer = M4aWriter::create(&path, track)?;

        log::info!(
            "Recording audio to {} (AAC, {} Hz, {} ch, {:?})",
            path.display(),
            config.sample_rate,
            config.channels,
            config.quality
        );

        Ok(Self {
            path,
            config,
            writer: Some(writer),
            encoder,
            converter: AudioConverter::new(config.sample_rate, config.channels),
            stats: None,
        })
    }

    /// Append a buffer of captured audio
    pub fn write(&mut self, sample: &AudioSample) -> Result<(), MediaError> {
        if self.writer.is_none() {
            return Err(MediaError::AudioError("Audio file already closed".to_string()));
        }
        let output = self.converter.convert(sample)?;
        if output.samples.is_empty() {
            return Ok(());
        }
        let packets = self.encoder.encode(&output.samples)?;
        self.write_packets(&packets)
    }

    fn write_packets(&mut self, packets: &[AacPacket]) -> Result<(), MediaError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MediaError::AudioError("Audio file already closed".to_string()))?;
        for packet in packets {
            writer.write_sample(&packet.data)?;
        }
        Ok(())
    }

    /// Flush and close the file. Calling again returns the same totals.
    pub fn finish(&mut self) -> Result<AudioSinkStats, MediaError> {
        if let Some(ref stats) = self.stats {
            return Ok(stats.clone());
        }
        if self.writer.is_none() {
            return Err(MediaError::AudioError("Audio file was discarded".to_string()));
        }

        if let Some(tail) = self.converter.flush()? {
            let packets = self.encoder.encode(&tail.samples)?;
            self.write_packets(&packets)?;
        }
        let packets = self.encoder.finish()?;
        self.write_packets(&packets)?;

        let writer = self
            .writer
            .take()
            .ok_or_else(|| MediaError::AudioError("Audio file was discarded".to_string()))?;
        let packets_written = writer.samples_written() as u64;
        let frames_written = self.encoder.frames_in();
        writer.finalize(frames_written)?;

        let stats = AudioSinkStats {
            frames_written,
            packets_written,
            duration_secs: frames_written as f64 / self.config.sample_rate as f64,
            path: self.path.to_string_lossy().to_string(),
        };
        log::info!(
            "Finished audio file {}: {:.2}s in {} AAC frames",
            stats.path,
            stats.duration_secs,
            stats.packets_written
        );
        self.stats = Some(stats.clone());
        Ok(stats)
    }

    /// Close without finalizing and delete the file
    pub fn abort(&mut self) {
        self.writer = None;
        self.stats = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Discarded audio file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove audio file {}: {}", self.path.display(), e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AudioSinkConfig {
        &self.config
    }

    pub fn frames_written(&self) -> u64 {
        self.encoder.frames_in()
    }
}

/// Converts captured audio to a fixed rate and channel count.
///
/// The input format is fixed by the first buffer; a later change is an error
/// because the resampler state would no longer line up. When resampling, up
/// to one chunk of input stays buffered between calls.
pub struct AudioConverter {
    sample_rate: u32,
    channels: u16,
    input: Option<(u32, u16)>,
    resampler: Option<ChunkResampler>,
    /// Source time of the latest buffer and the input frame index it starts at
    anchor: Option<(Duration, u64)>,
}

impl AudioConverter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            input: None,
            resampler: None,
            anchor: None,
        }
    }

    /// Remix and resample one buffer.
    ///
    /// The output is stamped with the source time of its first frame, which
    /// may belong to an earlier buffer still held by the resampler. The
    /// output is empty while less than one chunk is buffered.
    pub fn convert(&mut self, sample: &AudioSample) -> Result<AudioSample, MediaError> {
        if sample.channels == 0 || sample.sample_rate == 0 {
            return Err(MediaError::AudioError("Audio buffer has no format".to_string()));
        }

        match self.input {
            Some((rate, channels)) if rate != sample.sample_rate || channels != sample.channels => {
                return Err(MediaError::AudioError(format!(
                    "Audio format changed mid-recording: {} Hz {} ch, was {} Hz {} ch",
                    sample.sample_rate, sample.channels, rate, channels
                )));
            }
            Some(_) => {}
            None => self.input = Some((sample.sample_rate, sample.channels)),
        }

        let remixed = remix(&sample.samples, sample.channels, self.channels);
        if sample.sample_rate == self.sample_rate {
            return Ok(AudioSample {
                samples: remixed,
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp: sample.timestamp,
            });
        }

        let resampler = match self.resampler {
            Some(ref mut resampler) => resampler,
            None => self
                .resampler
                .insert(ChunkResampler::new(sample.sample_rate, self.sample_rate, self.channels)?),
        };

        let anchor = (sample.timestamp, resampler.frames_in());
        let first_out = resampler.frames_out();
        let samples = resampler.process(&remixed)?;
        let timestamp = stamp(anchor, first_out, sample.sample_rate, self.sample_rate);
        self.anchor = Some(anchor);

        Ok(AudioSample {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp,
        })
    }

    /// Push out whatever the resampler still holds, stamped like `convert`
    pub fn flush(&mut self) -> Result<Option<AudioSample>, MediaError> {
        let (Some(resampler), Some(anchor)) = (self.resampler.as_mut(), self.anchor) else {
            return Ok(None);
        };
        let first_out = resampler.frames_out();
        let samples = resampler.flush()?;
        if samples.is_empty() {
            return Ok(None);
        }

        Ok(Some(AudioSample {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp: stamp(anchor, first_out, resampler.from_rate(), self.sample_rate),
        }))
    }

    /// True when buffers in this format pass through untouched
    pub fn is_passthrough(&self, sample_rate: u32, channels: u16) -> bool {
        sample_rate == self.sample_rate && channels == self.channels
    }
}

/// Source time of output frame `out_index`, given an input buffer stamped
/// `anchor.0` that starts at input frame `anchor.1`
fn stamp(anchor: (Duration, u64), out_index: u64, from_rate: u32, to_rate: u32) -> Duration {
    let (timestamp, in_index) = anchor;
    let position = out_index as f64 * from_rate as f64 / to_rate as f64;
    let offset = (position - in_index as f64) / from_rate as f64;
    if offset < 0.0 {
        timestamp.saturating_sub(Duration::from_secs_f64(-offset))
    } else {
        timestamp + Duration::from_secs_f64(offset)
    }
}

/// Convert interleaved audio between channel counts.
///
/// Downmixing to mono averages all channels; other conversions map output
/// channel `c` to input channel `c % from`.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for c in 0..to {
                out.push(frame[c % from]);
            }
        }
    }
    out
}

/// Streaming resampler for interleaved audio on rubato's FFT resampler.
///
/// Input is buffered per channel until a full 20 ms chunk is available, so
/// capture buffers of any size resample as one continuous signal. The FFT
/// resampler's latency is trimmed from the front of the output, so output
/// frame `n` lines up with input frame `n * from / to`.
pub struct ChunkResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    resampler: FftFixedIn<f32>,
    pending: Vec<Vec<f32>>,
    /// Leading output frames still to discard
    skip: usize,
    frames_in: u64,
    frames_out: u64,
}

impl ChunkResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self, MediaError> {
        let channels = channels.max(1) as usize;
        let chunk = (from_rate as usize / 50).max(1);
        let resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, chunk, 1, channels).map_err(|e| {
            MediaError::AudioError(format!(
                "Failed to create resampler {} -> {} Hz: {}",
                from_rate, to_rate, e
            ))
        })?;
        let skip = resampler.output_delay();

        Ok(Self {
            from_rate,
            to_rate,
            channels,
            resampler,
            pending: vec![Vec::new(); channels],
            skip,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Latency of the underlying resampler, in output frames
    pub fn output_delay(&self) -> usize {
        self.resampler.output_delay()
    }

    /// Input frames waiting for a full chunk
    pub fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// Input frames accepted so far
    pub fn frames_in(&self) -> u64 {
        self.frames_in
    }

    /// Output frames returned so far
    pub fn frames_out(&self) -> u64 {
        self.frames_out
    }

    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, MediaError> {
        for frame in input.chunks_exact(self.channels) {
            for (channel, value) in self.pending.iter_mut().zip(frame) {
                channel.push(*value);
            }
            self.frames_in += 1;
        }

        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending_frames() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let resampled = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| MediaError::AudioError(format!("Resampling failed: {}", e)))?;
            self.emit(&resampled, &mut out);
        }
        Ok(out)
    }

    /// Push the buffered remainder and the resampler's delayed tail out.
    ///
    /// Zeros are fed until every accepted input frame has its output
    /// counterpart; the padding itself is cut off.
    pub fn flush(&mut self) -> Result<Vec<f32>, MediaError> {
        let expected = self.frames_in * self.to_rate as u64 / self.from_rate as u64;
        let mut out = Vec::new();

        if self.pending_frames() > 0 {
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
            let resampled = self
                .resampler
                .process_partial(Some(chunk.as_slice()), None)
                .map_err(|e| MediaError::AudioError(format!("Resampling failed: {}", e)))?;
            self.emit(&resampled, &mut out);
        }

        let mut rounds = 0;
        while self.frames_out < expected && rounds < MAX_FLUSH_ROUNDS {
            let resampled = self
                .resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| MediaError::AudioError(format!("Resampling failed: {}", e)))?;
            self.emit(&resampled, &mut out);
            rounds += 1;
        }

        if self.frames_out > expected {
            let excess = (self.frames_out - expected) as usize * self.channels;
            out.truncate(out.len().saturating_sub(excess));
            self.frames_out = expected;
        }
        Ok(out)
    }

    fn emit(&mut self, resampled: &[Vec<f32>], out: &mut Vec<f32>) {
        let frames = resampled.first().map_or(0, Vec::len);
        let skipped = self.skip.min(frames);
        self.skip -= skipped;
        if skipped == frames {
            return;
        }
        let trimmed: Vec<&[f32]> = resampled.iter().map(|channel| &channel[skipped..]).collect();
        interleave(&trimmed, out);
        self.frames_out += (frames - skipped) as u64;
    }
}

const MAX_FLUSH_ROUNDS: usize = 16;

fn interleave(channels: &[&[f32]], out: &mut Vec<f32>) {
    let frames = channels.first().map_or(0, |c| c.len());
    out.reserve(frames * channels.len());
    for i in 0..frames {
        for channel in channels {
            out.push(channel[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_audio_sample;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_remix_stereo_to_mono_averages() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(remix(&stereo, 2, 1), vec![0.5, 0.5]);
    }

    #[test]
    fn test_remix_mono_to_stereo_duplicates() {
        assert_eq!(remix(&[0.25, -0.25], 1, 2), vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_resampler_ratio() {
        let mut resampler = ChunkResampler::new(48000, 12000, 1).unwrap();
        let mut total = 0;
        // 1 second in uneven capture buffers
        for size in [960, 441, 1500, 97].iter().cycle().take(40) {
            total += resampler.process(&vec![0.1f32; *size]).unwrap().len();
        }
        total += resampler.flush().unwrap().len();
        let input: usize = [960, 441, 1500, 97].iter().sum::<usize>() * 10;
        assert_eq!(total, input / 4);
    }

    #[test]
    fn test_resampler_is_continuous_across_buffers() {
        let ramp: Vec<f32> = (0..4000).map(|i| (i as f32 / 4000.0).sin()).collect();

        let mut whole = ChunkResampler::new(44100, 12000, 1).unwrap();
        let expected = whole.process(&ramp).unwrap();

        let mut split = ChunkResampler::new(44100, 12000, 1).unwrap();
        let mut actual = split.process(&ramp[..137]).unwrap();
        actual.extend(split.process(&ramp[137..2900]).unwrap());
        actual.extend(split.process(&ramp[2900..]).unwrap());

        assert_eq!(expected.len(), actual.len());
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_converter_passthrough_keeps_buffer() {
        let mut converter = AudioConverter::new(48000, 2);
        assert!(converter.is_passthrough(48000, 2));
        let sample = synthetic_audio_sample(0, 480, 2, Duration::from_millis(730));
        let out = converter.convert(&sample).unwrap();
        assert_eq!(out.samples, sample.samples);
        assert_eq!(out.timestamp, Duration::from_millis(730));
    }

    #[test]
    fn test_converter_stamps_first_buffered_frame() {
        let mut converter = AudioConverter::new(48000, 2);
        let buffer = |ms: u64| AudioSample {
            samples: vec![0.5; 441],
            sample_rate: 44100,
            channels: 1,
            timestamp: Duration::from_millis(ms),
        };
        let delay = ChunkResampler::new(44100, 48000, 2).unwrap().output_delay();

        // 10 ms is less than one chunk
        let first = converter.convert(&buffer(700)).unwrap();
        assert!(first.samples.is_empty());

        let second = converter.convert(&buffer(710)).unwrap();
        assert_eq!(second.channels, 2);
        assert_eq!(second.sample_rate, 48000);
        assert_eq!(second.frames(), 960 - delay);
        assert_eq!(second.timestamp, Duration::from_millis(700));

        // The tail continues where the last output ended
        let tail = converter.flush().unwrap().expect("delayed tail");
        assert_eq!(tail.frames(), delay);
        let expected = Duration::from_millis(700) + Duration::from_secs_f64((960 - delay) as f64 / 48000.0);
        let drift = tail.timestamp.as_secs_f64() - expected.as_secs_f64();
        assert!(drift.abs() < 1e-6, "tail stamped {:?}, expected {:?}", tail.timestamp, expected);
        assert!(converter.flush().unwrap().is_none());
    }

    #[test]
    fn test_resampler_output_is_not_delayed() {
        let mut resampler = ChunkResampler::new(48000, 12000, 1).unwrap();
        let mut input = vec![0.0f32; 48000];
        input[0] = 1.0;
        input[47990] = 1.0;

        let mut out = resampler.process(&input).unwrap();
        out.extend(resampler.flush().unwrap());
        assert_eq!(out.len(), 12000);

        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 0);

        // The impulse 10 frames before the end survives the flush
        let tail_peak = out[11990..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(tail_peak > 0.05, "tail peak {}", tail_peak);
    }

    #[test]
    fn test_converter_flush_without_resampling() {
        let mut converter = AudioConverter::new(48000, 2);
        converter
            .convert(&synthetic_audio_sample(0, 480, 2, Duration::ZERO))
            .unwrap();
        assert!(converter.flush().unwrap().is_none());
    }

    fn find(data: &[u8], kind: &[u8; 4]) -> Option<usize> {
        data.windows(4).position(|w| w == kind)
    }

    #[test]
    fn test_sink_writes_aac_m4a() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audio.m4a");
        let mut sink = AudioSink::create(&path, AudioSinkConfig::default()).unwrap();

        for i in 0..50u64 {
            sink.write(&synthetic_audio_sample(i, 960, 2, Duration::from_millis(i * 20))).unwrap();
        }
        let stats = sink.finish().unwrap();
        assert_eq!(stats.frames_written, 12000);
        assert!((stats.duration_secs - 1.0).abs() < 1e-9);
        assert!(stats.packets_written >= 12);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[4..8], b"ftyp");
        assert!(find(&data, b"moov").is_some());
        let mp4a = find(&data, b"mp4a").expect("AAC sample entry");
        // channel count and sample rate in the sample entry
        assert_eq!(u16::from_be_bytes([data[mp4a + 20], data[mp4a + 21]]), 1);
        assert_eq!(u16::from_be_bytes([data[mp4a + 28], data[mp4a + 29]]), 12000);
        assert!(find(&data, b"esds").is_some());

        // Finishing again reports the same totals
        assert_eq!(sink.finish().unwrap(), stats);
    }

    #[test]
    fn test_sink_rejects_format_change() {
        let dir = tempdir().unwrap();
        let mut sink = AudioSink::create(dir.path().join("a.m4a"), AudioSinkConfig::default()).unwrap();
        sink.write(&synthetic_audio_sample(0, 960, 2, Duration::ZERO)).unwrap();
        let mono = synthetic_audio_sample(1, 960, 1, Duration::from_millis(20));
        assert!(matches!(sink.write(&mono), Err(MediaError::AudioError(_))));
    }

    #[test]
    fn test_abort_deletes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.m4a");
        let mut sink = AudioSink::create(&path, AudioSinkConfig::default()).unwrap();
        sink.write(&synthetic_audio_sample(0, 960, 2, Duration::ZERO)).unwrap();
        sink.abort();
        assert!(!path.exists());
        assert!(sink.finish().is_err());
    }
}
