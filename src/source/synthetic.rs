//! Synthetic screen source
//!
//! Emits ARGB test frames at a fixed rate, and optionally a 440 Hz tone in
//! 20 ms chunks, from a dedicated capture thread. The thread sleeps on its
//! stop channel between samples, so a stop request wakes it immediately.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::{FrameSink, FrameSource};
use crate::config::RecorderConfig;
use crate::errors::MediaError;
use crate::testing::{synthetic_audio_sample, synthetic_video_frame, SYNTHETIC_SAMPLE_RATE};
use crate::timing::PTSClock;

const AUDIO_CHUNK: Duration = Duration::from_millis(20);

/// Frame geometry and test behaviour of a synthetic source
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Stop producing after this many frames; the thread then idles until stopped
    pub frame_limit: Option<u64>,
    /// Report a fatal capture error instead of producing frame `n`
    pub fail_after: Option<u64>,
    pub audio_channels: u16,
}

impl SyntheticConfig {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            frame_limit: None,
            fail_after: None,
            audio_channels: 2,
        }
    }

    /// Match the recorder's video geometry
    pub fn from_recorder(config: &RecorderConfig) -> Self {
        let mut synthetic = Self::new(config.video.width, config.video.height, config.video.fps);
        synthetic.audio_channels = config.audio.muxed_channels;
        synthetic
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

/// Screen source producing generated frames
pub struct SyntheticScreenSource {
    config: SyntheticConfig,
    clock: PTSClock,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    frames_emitted: Arc<AtomicU64>,
}

impl SyntheticScreenSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self::with_clock(config, PTSClock::new())
    }

    /// Stamp samples on an existing clock, e.g. one shared with a microphone
    pub fn with_clock(config: SyntheticConfig, clock: PTSClock) -> Self {
        Self {
            config,
            clock,
            stop_tx: None,
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
            frames_emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn clock(&self) -> &PTSClock {
        &self.clock
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Frames handed to the sink by the current or last run
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }
}

impl FrameSource for SyntheticScreenSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>, with_audio: bool) -> Result<(), MediaError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(MediaError::SourceError("Synthetic source is already capturing".to_string()));
        }
        if self.config.fps <= 0.0 || self.config.width == 0 || self.config.height == 0 {
            return Err(MediaError::SourceError(format!(
                "Invalid synthetic capture format {}x{} @ {} fps",
                self.config.width, self.config.height, self.config.fps
            )));
        }

        // The previous run has already confirmed its halt
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Previous synthetic capture thread panicked");
            }
        }

        let (stop_tx, stop_rx) = bounded(1);
        let config = self.config.clone();
        let clock = self.clock.clone();
        let running = Arc::clone(&self.running);
        let emitted = Arc::clone(&self.frames_emitted);

        emitted.store(0, Ordering::Relaxed);
        running.store(true, Ordering::SeqCst);

        let worker = std::thread::Builder::new()
            .name("crabscreen-capture".to_string())
            .spawn(move || capture_loop(&config, &clock, sink.as_ref(), with_audio, &stop_rx, &emitted, &running))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                MediaError::SourceError(format!("Failed to spawn capture thread: {}", e))
            })?;

        log::debug!(
            "Synthetic capture started: {}x{} @ {} fps, audio: {}",
            self.config.width,
            self.config.height,
            self.config.fps,
            with_audio
        );

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticScreenSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    config: &SyntheticConfig,
    clock: &PTSClock,
    sink: &dyn FrameSink,
    with_audio: bool,
    stop_rx: &Receiver<()>,
    emitted: &AtomicU64,
    running: &AtomicBool,
) {
    let frame_interval = Duration::from_secs_f64(1.0 / config.fps);
    let chunk_frames = (SYNTHETIC_SAMPLE_RATE as u64 * AUDIO_CHUNK.as_millis() as u64 / 1000) as usize;

    let start = clock.now();
    let mut next_frame = start;
    let mut next_chunk = start;
    let mut frame_no = 0u64;
    let mut chunk_no = 0u64;
    let mut dropped = 0u64;

    loop {
        let exhausted = config.frame_limit.map_or(false, |limit| frame_no >= limit);
        let due = if exhausted {
            None
        } else if with_audio {
            Some(next_frame.min(next_chunk))
        } else {
            Some(next_frame)
        };

        let signal = match due {
            Some(at) => stop_rx.recv_timeout(at.saturating_sub(clock.now())),
            None => stop_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match signal {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = clock.now();

        if now >= next_frame {
            if config.fail_after == Some(frame_no) {
                log::error!("Synthetic capture failing after {} frames", frame_no);
                running.store(false, Ordering::SeqCst);
                sink.on_error(MediaError::SourceError(format!(
                    "Capture device lost after {} frames",
                    frame_no
                )));
                return;
            }

            let frame = synthetic_video_frame(frame_no, config.width, config.height, now);
            if sink.on_video(frame).is_accepted() {
                emitted.fetch_add(1, Ordering::Relaxed);
            } else {
                dropped += 1;
            }
            frame_no += 1;
            next_frame += frame_interval;
            // Fell behind by more than a frame: skip the missed slots
            if now > next_frame + frame_interval {
                next_frame = now + frame_interval;
            }
        }

        if with_audio && now >= next_chunk {
            let sample = synthetic_audio_sample(chunk_no, chunk_frames, config.audio_channels, next_chunk);
            let _ = sink.on_audio(sample);
            chunk_no += 1;
            next_chunk += AUDIO_CHUNK;
        }
    }

    if dropped > 0 {
        log::debug!("Synthetic capture: {} of {} frames dropped by the sink", dropped, frame_no);
    }
    // Idle before confirming, so a start issued on confirmation succeeds
    running.store(false, Ordering::SeqCst);
    sink.on_stopped();
}
