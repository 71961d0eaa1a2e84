//! Two-track muxer with bounded queues and a dedicated writer thread
//!
//! Appends never block: each track has a bounded queue drained by the writer
//! thread, and a full queue is reported back as `AppendOutcome::NotReady` so
//! the capture side can drop the sample and keep real-time pace.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TrySendError};

use super::config::{RecordingConfig, RecordingStats};
use super::writer::{TrackWriter, WriterFactory};
use crate::errors::MediaError;
use crate::timing::{TimestampOrigin, TimestampRejection};
use crate::types::{AudioSample, Track, VideoFrame};

/// Result of offering one sample to the muxer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Queued for the writer thread
    Appended,
    /// The track queue is full; the sample was dropped
    NotReady,
    /// Timestamp precedes the origin or regresses on its track; dropped
    Late,
    /// The track has been marked finished
    Closed,
}

type Latch = Arc<Mutex<Option<MediaError>>>;

/// Multiplexes one video track and an optional audio track into a container.
///
/// Lifecycle: `create` → `start_writing` → `append_*` → `mark_all_finished`
/// → `finish`. `abort` can replace `finish` at any point.
pub struct Muxer {
    path: PathBuf,
    config: RecordingConfig,
    /// Writer waiting for `start_writing`
    pending: Option<Box<dyn TrackWriter>>,
    worker: Option<JoinHandle<Option<Box<dyn TrackWriter>>>>,
    video_tx: Option<Sender<(f64, VideoFrame)>>,
    audio_tx: Option<Sender<(f64, AudioSample)>>,
    video_open: bool,
    audio_open: bool,
    origin: TimestampOrigin,
    failure: Latch,
    result: Option<Result<RecordingStats, MediaError>>,
    appended_video: u64,
    appended_audio: u64,
    dropped_frames: u64,
    dropped_audio: u64,
    late_samples: u64,
}

impl Muxer {
    /// Open the container at `path`. Nothing is accepted until `start_writing`.
    pub fn create(path: impl AsRef<Path>, config: RecordingConfig, factory: &dyn WriterFactory) -> Result<Self, MediaError> {
        let path = path.as_ref().to_path_buf();
        let writer = factory.create(&path, &config)?;

        log::debug!(
            "Opened container {} ({}x{} @ {} fps, audio track: {})",
            path.display(),
            config.width,
            config.height,
            config.fps,
            config.has_audio()
        );

        let audio_open = config.has_audio();
        Ok(Self {
            path,
            config,
            pending: Some(writer),
            worker: None,
            video_tx: None,
            audio_tx: None,
            video_open: true,
            audio_open,
            origin: TimestampOrigin::new(),
            failure: Arc::new(Mutex::new(None)),
            result: None,
            appended_video: 0,
            appended_audio: 0,
            dropped_frames: 0,
            dropped_audio: 0,
            late_samples: 0,
        })
    }

    /// Hand the writer to its thread and begin accepting samples
    pub fn start_writing(&mut self) -> Result<(), MediaError> {
        let writer = self
            .pending
            .take()
            .ok_or_else(|| MediaError::MuxingError("Writing already started".to_string()))?;

        let (video_tx, video_rx) = bounded(self.config.video_queue_capacity.max(1));
        let (audio_tx, audio_rx) = bounded(self.config.audio_queue_capacity.max(1));
        let failure = Arc::clone(&self.failure);

        let worker = std::thread::Builder::new()
            .name("crabscreen-writer".to_string())
            .spawn(move || run_writer(writer, video_rx, audio_rx, failure))
            .map_err(|e| MediaError::MuxingError(format!("Failed to spawn writer thread: {}", e)))?;

        self.worker = Some(worker);
        if self.video_open {
            self.video_tx = Some(video_tx);
        }
        if self.audio_open {
            self.audio_tx = Some(audio_tx);
        }
        Ok(())
    }

    pub fn append_video(&mut self, frame: VideoFrame) -> Result<AppendOutcome, MediaError> {
        self.check_failure()?;
        self.check_writing()?;
        if !self.video_open {
            return Ok(AppendOutcome::Closed);
        }

        let relative = match self.rebase(Track::Video, frame.timestamp) {
            Some(relative) => relative,
            None => return Ok(AppendOutcome::Late),
        };

        let outcome = match self.video_tx.as_ref() {
            Some(tx) => offer(tx, (relative.as_secs_f64(), frame)),
            None => Offer::Disconnected,
        };
        self.settle(Track::Video, relative, outcome)
    }

    pub fn append_audio(&mut self, sample: AudioSample) -> Result<AppendOutcome, MediaError> {
        if !self.config.has_audio() {
            return Err(MediaError::MuxingError("Recording has no audio track".to_string()));
        }
        self.check_failure()?;
        self.check_writing()?;
        if !self.audio_open {
            return Ok(AppendOutcome::Closed);
        }

        let relative = match self.rebase(Track::Audio, sample.timestamp) {
            Some(relative) => relative,
            None => return Ok(AppendOutcome::Late),
        };

        let outcome = match self.audio_tx.as_ref() {
            Some(tx) => offer(tx, (relative.as_secs_f64(), sample)),
            None => Offer::Disconnected,
        };
        self.settle(Track::Audio, relative, outcome)
    }

    /// Close one track; later appends on it return `Closed`
    pub fn mark_finished(&mut self, track: Track) {
        match track {
            Track::Video => {
                self.video_open = false;
                self.video_tx = None;
            }
            Track::Audio => {
                self.audio_open = false;
                self.audio_tx = None;
            }
        }
    }

    pub fn mark_all_finished(&mut self) {
        self.mark_finished(Track::Video);
        self.mark_finished(Track::Audio);
    }

    pub fn is_track_open(&self, track: Track) -> bool {
        match track {
            Track::Video => self.video_open,
            Track::Audio => self.audio_open,
        }
    }

    /// Drain the queues, close the container and report totals.
    ///
    /// Every track must have been marked finished. Calling again returns the
    /// first result.
    pub fn finish(&mut self) -> Result<RecordingStats, MediaError> {
        if let Some(ref result) = self.result {
            return result.clone();
        }
        if self.video_open || self.audio_open {
            return Err(MediaError::MuxingError(
                "Cannot finish while a track is still open".to_string(),
            ));
        }

        let result = self.finalize();
        match result {
            Ok(ref stats) => {
                log::info!(
                    "Finished {}: {} video frames, {} audio packets, {:.2}s, {} bytes",
                    stats.output_path,
                    stats.video_frames,
                    stats.audio_frames,
                    stats.duration_secs,
                    stats.bytes_written
                );
                if stats.dropped_frames + stats.dropped_audio + stats.late_samples > 0 {
                    log::warn!(
                        "{}: dropped {} frames and {} audio buffers under backpressure, {} late samples",
                        stats.output_path,
                        stats.dropped_frames,
                        stats.dropped_audio,
                        stats.late_samples
                    );
                }
            }
            Err(ref e) => log::error!("Failed to finalize {}: {}", self.path.display(), e),
        }

        self.result = Some(result.clone());
        result
    }

    /// Release all tracks without finalizing and delete the partial output
    pub fn abort(&mut self) {
        if self.result.is_some() {
            return;
        }
        self.video_open = false;
        self.audio_open = false;
        self.video_tx = None;
        self.audio_tx = None;
        self.pending = None;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Writer thread panicked during abort");
            }
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("Discarded partial recording {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove partial recording {}: {}", self.path.display(), e),
        }

        self.result = Some(Err(MediaError::MuxingError("Recording was aborted".to_string())));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn is_writing(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Source timestamp of container time zero, once any sample was seen
    pub fn origin(&self) -> Option<Duration> {
        self.origin.origin()
    }

    /// Track whose first sample set the origin
    pub fn origin_track(&self) -> Option<Track> {
        self.origin.first_track()
    }

    /// Last accepted container-relative timestamp on `track`
    pub fn last_timestamp(&self, track: Track) -> Option<Duration> {
        self.origin.last(track)
    }

    pub fn appended(&self, track: Track) -> u64 {
        match track {
            Track::Video => self.appended_video,
            Track::Audio => self.appended_audio,
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn dropped_audio(&self) -> u64 {
        self.dropped_audio
    }

    pub fn late_samples(&self) -> u64 {
        self.late_samples
    }

    /// Writer failure recorded so far, if any
    pub fn failure(&self) -> Option<MediaError> {
        lock_latch(&self.failure).clone()
    }

    fn check_failure(&self) -> Result<(), MediaError> {
        match self.failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_writing(&self) -> Result<(), MediaError> {
        if self.result.is_some() {
            return Err(MediaError::MuxingError("Recording already finished".to_string()));
        }
        if self.worker.is_none() {
            return Err(MediaError::MuxingError(
                "Samples appended before writing started".to_string(),
            ));
        }
        Ok(())
    }

    fn rebase(&mut self, track: Track, timestamp: Duration) -> Option<Duration> {
        match self.origin.rebase(track, timestamp) {
            Ok(relative) => Some(relative),
            Err(rejection) => {
                self.late_samples += 1;
                if self.late_samples == 1 {
                    let reason = match rejection {
                        TimestampRejection::BeforeOrigin => "precedes the session origin",
                        TimestampRejection::Regressed => "regresses on its track",
                    };
                    log::warn!("Dropping {:?} sample at {:?}: timestamp {}", track, timestamp, reason);
                }
                None
            }
        }
    }

    fn settle(&mut self, track: Track, relative: Duration, outcome: Offer) -> Result<AppendOutcome, MediaError> {
        match outcome {
            Offer::Sent => {
                self.origin.commit(track, relative);
                match track {
                    Track::Video => self.appended_video += 1,
                    Track::Audio => self.appended_audio += 1,
                }
                Ok(AppendOutcome::Appended)
            }
            Offer::Full => {
                let dropped = match track {
                    Track::Video => {
                        self.dropped_frames += 1;
                        self.dropped_frames
                    }
                    Track::Audio => {
                        self.dropped_audio += 1;
                        self.dropped_audio
                    }
                };
                if dropped == 1 {
                    log::warn!("{:?} track not ready, dropping samples", track);
                }
                Ok(AppendOutcome::NotReady)
            }
            Offer::Disconnected => {
                // The writer thread only hangs up early when it failed
                self.check_failure()?;
                Ok(AppendOutcome::Closed)
            }
        }
    }

    fn finalize(&mut self) -> Result<RecordingStats, MediaError> {
        let writer = match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| MediaError::MuxingError("Writer thread panicked".to_string()))?,
            None => self.pending.take(),
        };

        self.check_failure()?;
        let writer = writer.ok_or_else(|| MediaError::MuxingError("Writer is no longer available".to_string()))?;
        let stats = writer.finish()?;

        Ok(RecordingStats {
            video_frames: stats.video_frames,
            audio_frames: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
            dropped_frames: self.dropped_frames,
            dropped_audio: self.dropped_audio,
            late_samples: self.late_samples,
            origin_secs: self.origin.origin().map(|o| o.as_secs_f64()),
            output_path: self.path.to_string_lossy().to_string(),
        })
    }
}

enum Offer {
    Sent,
    Full,
    Disconnected,
}

fn offer<T>(tx: &Sender<T>, item: T) -> Offer {
    match tx.try_send(item) {
        Ok(()) => Offer::Sent,
        Err(TrySendError::Full(_)) => Offer::Full,
        Err(TrySendError::Disconnected(_)) => Offer::Disconnected,
    }
}

fn lock_latch(latch: &Latch) -> std::sync::MutexGuard<'_, Option<MediaError>> {
    latch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writer thread body: drain both queues until every sender is gone.
///
/// Returns the writer for finalization, or `None` after latching a failure.
fn run_writer(
    mut writer: Box<dyn TrackWriter>,
    video_rx: Receiver<(f64, VideoFrame)>,
    audio_rx: Receiver<(f64, AudioSample)>,
    failure: Latch,
) -> Option<Box<dyn TrackWriter>> {
    let closed_video = never();
    let closed_audio = never();
    let mut video_open = true;
    let mut audio_open = true;

    while video_open || audio_open {
        let video = if video_open { &video_rx } else { &closed_video };
        let audio = if audio_open { &audio_rx } else { &closed_audio };

        let written = select! {
            recv(video) -> msg => match msg {
                Ok((pts, frame)) => writer.write_video(pts, &frame),
                Err(_) => {
                    video_open = false;
                    Ok(())
                }
            },
            recv(audio) -> msg => match msg {
                Ok((pts, sample)) => writer.write_audio(pts, &sample),
                Err(_) => {
                    audio_open = false;
                    Ok(())
                }
            },
        };

        if let Err(e) = written {
            log::error!("Writer thread failed: {}", e);
            *lock_latch(&failure) = Some(e);
            return None;
        }
    }

    Some(writer)
}
