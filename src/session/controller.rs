//! Session controller
//!
//! Owns the one capture session: opens the writers, registers the session as
//! the source's sink, and turns the source's asynchronous halt confirmation
//! into the result of `stop`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::errors::RecordingError;
use super::state::SessionState;
use crate::audio::{AudioConverter, AudioSink, AudioSinkStats};
use crate::config::RecorderConfig;
use crate::errors::MediaError;
use crate::recording::{AppendOutcome, AudioPolicy, Mp4WriterFactory, Muxer, RecordingStats, WriterFactory};
use crate::source::{Delivery, FrameSink, FrameSource};
use crate::types::{AudioSample, VideoFrame};

/// Parameters of a new recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Output file stem; the container extension is appended
    pub name: String,
    pub audio: AudioPolicy,
    /// Title metadata written into the container
    pub title: Option<String>,
}

impl StartRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            audio: AudioPolicy::None,
            title: None,
        }
    }

    pub fn with_audio(mut self, policy: AudioPolicy) -> Self {
        self.audio = policy;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Describes the running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub name: String,
    pub output_path: PathBuf,
    pub audio_policy: AudioPolicy,
    /// Independent audio file, under `AudioPolicy::IndependentFile`
    pub audio_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a successful `stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResult {
    pub id: Uuid,
    pub output_path: PathBuf,
    pub audio_file: Option<PathBuf>,
    pub stats: RecordingStats,
    pub audio_stats: Option<AudioSinkStats>,
}

struct ActiveSession {
    info: SessionInfo,
    sink: Arc<SessionSink>,
    halted: Option<oneshot::Receiver<()>>,
}

/// Drives the `Idle → Starting → Capturing → Stopping → Idle` lifecycle
pub struct SessionController {
    config: RecorderConfig,
    source: Mutex<Box<dyn FrameSource>>,
    factory: Arc<dyn WriterFactory>,
    state: Arc<Mutex<SessionState>>,
    session: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(config: RecorderConfig, source: Box<dyn FrameSource>, factory: Arc<dyn WriterFactory>) -> Self {
        Self {
            config,
            source: Mutex::new(source),
            factory,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            session: Mutex::new(None),
        }
    }

    /// Controller writing H.264/Opus MP4 files
    pub fn with_mp4(config: RecorderConfig, source: Box<dyn FrameSource>) -> Self {
        Self::new(config, source, Arc::new(Mp4WriterFactory))
    }

    /// Start recording to `<output dir>/<name>.<ext>`.
    ///
    /// With `include_audio` the configured audio policy applies; without it
    /// the recording is video only.
    pub fn start(&self, name: &str, include_audio: bool) -> Result<SessionInfo, RecordingError> {
        let policy = if include_audio {
            self.config.audio.policy
        } else {
            AudioPolicy::None
        };
        self.start_with(StartRequest::new(name).with_audio(policy))
    }

    pub fn start_with(&self, request: StartRequest) -> Result<SessionInfo, RecordingError> {
        validate_name(&request.name)?;

        {
            let mut state = lock(&self.state);
            if *state != SessionState::Idle {
                return Err(RecordingError::invalid_state(format!(
                    "Cannot start a recording while the session is {}",
                    *state
                )));
            }
            *state = SessionState::Starting;
        }

        match self.open_session(request) {
            Ok(info) => Ok(info),
            Err(e) => {
                log::error!("Failed to start recording: {} ({})", e, e.detail.as_deref().unwrap_or("-"));
                *lock(&self.state) = SessionState::Idle;
                Err(e)
            }
        }
    }

    fn open_session(&self, request: StartRequest) -> Result<SessionInfo, RecordingError> {
        let id = Uuid::new_v4();
        let policy = request.audio;
        let output_dir = self.config.output_directory();
        std::fs::create_dir_all(&output_dir).map_err(|e| RecordingError::writer_init(&MediaError::from(e)))?;

        let output_path = self.config.container_path(&request.name);
        let recording = self.config.recording_config(policy, request.title.clone());
        let mut muxer =
            Muxer::create(&output_path, recording, self.factory.as_ref()).map_err(|e| RecordingError::writer_init(&e))?;

        let mut audio_file = None;
        if policy == AudioPolicy::IndependentFile {
            match AudioSink::create(self.config.audio_file_path(), self.config.sink_config()) {
                Ok(sink) => audio_file = Some(sink),
                Err(e) => {
                    muxer.abort();
                    return Err(RecordingError::writer_init(&e));
                }
            }
        }

        if let Err(e) = muxer.start_writing() {
            muxer.abort();
            if let Some(mut sink) = audio_file {
                sink.abort();
            }
            return Err(RecordingError::writer_init(&e));
        }

        let converter = (policy == AudioPolicy::MuxedTrack)
            .then(|| AudioConverter::new(self.config.audio.muxed_sample_rate, self.config.audio.muxed_channels));
        let audio_path = audio_file.as_ref().map(|s| s.path().to_path_buf());

        let (halt_tx, halt_rx) = oneshot::channel();
        let sink = Arc::new(SessionSink {
            id,
            state: Arc::clone(&self.state),
            policy,
            live: AtomicBool::new(true),
            muxer: Mutex::new(Some(muxer)),
            audio_file: Mutex::new(audio_file),
            converter: Mutex::new(converter),
            halted: Mutex::new(Some(halt_tx)),
            failure: Mutex::new(None),
        });

        let info = SessionInfo {
            id,
            name: request.name,
            output_path,
            audio_policy: policy,
            audio_file: audio_path,
            started_at: Utc::now(),
        };

        *lock(&self.session) = Some(ActiveSession {
            info: info.clone(),
            sink: Arc::clone(&sink),
            halted: Some(halt_rx),
        });

        let started = {
            let mut source = lock(&self.source);
            source.start(sink, policy.includes_audio())
        };
        if let Err(e) = started {
            self.teardown();
            return Err(RecordingError::capture_start(&e));
        }

        log::info!(
            "Recording {} started: {} (audio: {})",
            info.id,
            info.output_path.display(),
            policy.as_str()
        );
        Ok(info)
    }

    /// Halt capture, finalize the container and return its path.
    ///
    /// Waits for the source's halt confirmation for at most
    /// `pipeline.stop_timeout_ms`; the container is finalized on the blocking
    /// pool.
    pub async fn stop(&self) -> Result<RecordingResult, RecordingError> {
        let previous = {
            let mut state = lock(&self.state);
            let previous = *state;
            if previous.is_stoppable() {
                *state = SessionState::Stopping;
            }
            previous
        };

        match previous {
            SessionState::Idle => return Err(RecordingError::invalid_state("No recording in progress")),
            SessionState::Stopping => return Err(RecordingError::invalid_state("A stop is already in progress")),
            SessionState::Error => return Err(self.acknowledge_failure()),
            SessionState::Starting | SessionState::Capturing => {}
        }

        let (sink, halted) = {
            let mut session = lock(&self.session);
            match session.as_mut() {
                Some(active) => (Arc::clone(&active.sink), active.halted.take()),
                None => {
                    drop(session);
                    *lock(&self.state) = SessionState::Idle;
                    return Err(RecordingError::invalid_state("No recording in progress"));
                }
            }
        };

        log::debug!("Stopping recording {} (was {})", sink.id, previous);
        lock(&self.source).stop();

        let timeout = self.config.stop_timeout();
        let confirmed = match halted {
            Some(rx) => tokio::time::timeout(timeout, rx).await,
            None => Ok(Ok(())),
        };
        match confirmed {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.teardown();
                return Err(RecordingError::stop_failure(
                    "Capture ended without confirming the halt",
                    "halt channel closed",
                ));
            }
            Err(_) => {
                log::error!("Recording {}: no halt confirmation within {:?}", sink.id, timeout);
                self.teardown();
                return Err(RecordingError::stop_failure(
                    "Capture did not halt in time",
                    format!("no halt confirmation within {} ms", timeout.as_millis()),
                ));
            }
        }

        if let Some(e) = sink.failure() {
            self.teardown();
            return Err(RecordingError::mid_capture(&e));
        }

        let (muxer, audio_file) = sink.detach();
        let converter = lock(&sink.converter).take();
        let finalized = tokio::task::spawn_blocking(move || finalize(muxer, audio_file, converter))
            .await
            .unwrap_or_else(|e| Err(RecordingError::stop_failure("Finalize task failed", e.to_string())));

        let active = self.teardown();
        let (stats, audio_stats) = finalized.map_err(|e| {
            log::error!("Recording {}: {} ({})", sink.id, e, e.detail.as_deref().unwrap_or("-"));
            e
        })?;

        let info = active
            .map(|a| a.info)
            .ok_or_else(|| RecordingError::stop_failure("Session vanished during stop", sink.id.to_string()))?;

        log::info!("Recording {} saved to {}", info.id, info.output_path.display());
        Ok(RecordingResult {
            id: info.id,
            output_path: info.output_path,
            audio_file: info.audio_file,
            stats,
            audio_stats,
        })
    }

    /// Report the latched failure of a session in `Error` and reset to `Idle`
    fn acknowledge_failure(&self) -> RecordingError {
        lock(&self.source).stop();
        let active = self.teardown();
        let failure = active.as_ref().and_then(|a| a.sink.failure());
        match failure {
            Some(e) => RecordingError::mid_capture(&e),
            None => RecordingError::mid_capture(&MediaError::SourceError("capture failed".to_string())),
        }
    }

    /// Drop the session, discarding any writer that was not finalized
    fn teardown(&self) -> Option<ActiveSession> {
        let active = lock(&self.session).take();
        {
            let mut state = lock(&self.state);
            if let Some(ref active) = active {
                active.sink.live.store(false, Ordering::SeqCst);
            }
            *state = SessionState::Idle;
        }
        if let Some(ref active) = active {
            active.sink.release_writers();
        }
        active
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        lock(&self.session).as_ref().map(|a| a.info.clone())
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn source_name(&self) -> String {
        lock(&self.source).name().to_string()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if lock(&self.session).is_some() {
            log::warn!("Session controller dropped with an active recording; discarding it");
            lock(&self.source).stop();
            self.teardown();
        }
    }
}

fn finalize(
    muxer: Option<Muxer>,
    audio_file: Option<AudioSink>,
    converter: Option<AudioConverter>,
) -> Result<(RecordingStats, Option<AudioSinkStats>), RecordingError> {
    let mut muxer = muxer.ok_or_else(|| RecordingError::stop_failure("Recording writer is gone", "muxer released before finalize"))?;
    if let Some(converter) = converter {
        append_audio_tail(&mut muxer, converter);
    }
    muxer.mark_all_finished();
    let stats = muxer.finish();

    let audio_stats = audio_file.map(|mut sink| sink.finish()).transpose();

    let stats = stats.map_err(|e| RecordingError::stop_failure("Failed to finalize the recording", e.to_string()))?;
    let audio_stats =
        audio_stats.map_err(|e| RecordingError::stop_failure("Failed to finalize the audio file", e.to_string()))?;
    Ok((stats, audio_stats))
}

/// Hand the resampler's buffered tail to the muxer before its tracks close
fn append_audio_tail(muxer: &mut Muxer, mut converter: AudioConverter) {
    let tail = match converter.flush() {
        Ok(Some(tail)) => tail,
        Ok(None) => return,
        Err(e) => {
            log::warn!("Dropping buffered audio tail: {}", e);
            return;
        }
    };

    for _ in 0..TAIL_APPEND_ATTEMPTS {
        match muxer.append_audio(tail.clone()) {
            Ok(AppendOutcome::NotReady) => std::thread::sleep(Duration::from_millis(5)),
            Ok(outcome) => {
                log::debug!("Buffered audio tail of {} frames: {:?}", tail.frames(), outcome);
                return;
            }
            // Latched by the muxer and reported by finish
            Err(_) => return,
        }
    }
    log::warn!("Dropping buffered audio tail: audio queue stayed full");
}

const TAIL_APPEND_ATTEMPTS: usize = 100;

fn validate_name(name: &str) -> Result<(), RecordingError> {
    if name.trim().is_empty() {
        return Err(RecordingError::invalid_argument("Recording name must not be empty"));
    }
    if name.contains(&['/', '\\', '\0'][..]) || name == "." || name == ".." {
        return Err(RecordingError::invalid_argument(format!(
            "Recording name '{}' must be a plain file name",
            name
        )));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The session as seen by the capture thread
struct SessionSink {
    id: Uuid,
    state: Arc<Mutex<SessionState>>,
    policy: AudioPolicy,
    /// Cleared when the controller lets go of this session
    live: AtomicBool,
    muxer: Mutex<Option<Muxer>>,
    audio_file: Mutex<Option<AudioSink>>,
    converter: Mutex<Option<AudioConverter>>,
    halted: Mutex<Option<oneshot::Sender<()>>>,
    failure: Mutex<Option<MediaError>>,
}

impl SessionSink {
    fn failure(&self) -> Option<MediaError> {
        lock(&self.failure).clone()
    }

    /// `Starting → Capturing` on the first delivered sample
    fn mark_capturing(&self) {
        let mut state = lock(&self.state);
        if *state == SessionState::Starting && self.live.load(Ordering::SeqCst) {
            *state = SessionState::Capturing;
            log::debug!("Recording {} capturing", self.id);
        }
    }

    fn settle(&self, appended: Result<AppendOutcome, MediaError>) -> Delivery {
        match appended {
            Ok(AppendOutcome::Appended) => {
                self.mark_capturing();
                Delivery::Accepted
            }
            Ok(_) => Delivery::Dropped,
            Err(e) => {
                self.fail(e);
                Delivery::Dropped
            }
        }
    }

    fn fail(&self, error: MediaError) {
        {
            let mut state = lock(&self.state);
            if !self.live.load(Ordering::SeqCst) {
                return;
            }
            let mut failure = lock(&self.failure);
            if failure.is_some() {
                return;
            }
            *failure = Some(error.clone());
            if state.is_stoppable() {
                *state = SessionState::Error;
            }
        }

        log::error!("Recording {} failed: {}", self.id, error);
        self.release_writers();
        self.signal_halt();
    }

    fn signal_halt(&self) {
        if let Some(tx) = lock(&self.halted).take() {
            let _ = tx.send(());
        }
    }

    /// Take the writers for finalization; later deliveries are dropped
    fn detach(&self) -> (Option<Muxer>, Option<AudioSink>) {
        self.live.store(false, Ordering::SeqCst);
        let muxer = lock(&self.muxer).take();
        let audio_file = lock(&self.audio_file).take();
        (muxer, audio_file)
    }

    /// Abort whatever writers are still attached, deleting partial output
    fn release_writers(&self) {
        let (muxer, audio_file) = self.detach();
        if let Some(mut muxer) = muxer {
            muxer.abort();
        }
        if let Some(mut sink) = audio_file {
            sink.abort();
        }
    }
}

impl FrameSink for SessionSink {
    fn on_video(&self, frame: VideoFrame) -> Delivery {
        if !self.live.load(Ordering::SeqCst) {
            return Delivery::Dropped;
        }
        let appended = match lock(&self.muxer).as_mut() {
            Some(muxer) => muxer.append_video(frame),
            None => return Delivery::Dropped,
        };
        self.settle(appended)
    }

    fn on_audio(&self, sample: AudioSample) -> Delivery {
        if !self.live.load(Ordering::SeqCst) {
            return Delivery::Dropped;
        }

        match self.policy {
            AudioPolicy::None => Delivery::Dropped,
            AudioPolicy::MuxedTrack => {
                let converted = match lock(&self.converter).as_mut() {
                    Some(converter) => converter.convert(&sample),
                    None => return Delivery::Dropped,
                };
                let appended = match converted {
                    // Held by the resampler until a full chunk arrives
                    Ok(sample) if sample.samples.is_empty() => return Delivery::Accepted,
                    Ok(sample) => match lock(&self.muxer).as_mut() {
                        Some(muxer) => muxer.append_audio(sample),
                        None => return Delivery::Dropped,
                    },
                    Err(e) => Err(e),
                };
                self.settle(appended)
            }
            AudioPolicy::IndependentFile => {
                let written = match lock(&self.audio_file).as_mut() {
                    Some(file) => file.write(&sample),
                    None => return Delivery::Dropped,
                };
                match written {
                    Ok(()) => {
                        self.mark_capturing();
                        Delivery::Accepted
                    }
                    Err(e) => {
                        self.fail(e);
                        Delivery::Dropped
                    }
                }
            }
        }
    }

    fn on_error(&self, error: MediaError) {
        self.fail(error);
    }

    fn on_stopped(&self) {
        log::debug!("Recording {}: capture halted", self.id);
        self.signal_halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("clip1").is_ok());
        assert!(validate_name("my recording").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn test_start_request_builder() {
        let request = StartRequest::new("demo")
            .with_audio(AudioPolicy::IndependentFile)
            .with_title("Demo");
        assert_eq!(request.audio, AudioPolicy::IndependentFile);
        assert_eq!(request.title.as_deref(), Some("Demo"));
    }
}
