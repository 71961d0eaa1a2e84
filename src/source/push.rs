//! Host-driven source
//!
//! `PushSource` is the seam for a capture facility that lives outside this
//! crate, such as a platform screen-capture callback. The host keeps a
//! `PushHandle` and pushes frames, audio and fatal errors through it; the
//! session sees an ordinary `FrameSource`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Delivery, FrameSink, FrameSource};
use crate::errors::MediaError;
use crate::types::{AudioSample, VideoFrame};

/// How a halt request is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Confirmed right away from a helper thread
    Immediate,
    /// Confirmed when the host calls `PushHandle::confirm_stopped`
    External,
}

#[derive(Default)]
struct Slot {
    sink: Option<Arc<dyn FrameSink>>,
    with_audio: bool,
    refuse_next: Option<String>,
}

struct Shared {
    name: String,
    mode: StopMode,
    slot: Mutex<Slot>,
    stop_requested: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.lock().sink.clone()
    }

    /// Detach the sink and confirm the halt to it
    fn halt(&self) {
        let sink = self.lock().sink.take();
        if let Some(sink) = sink {
            sink.on_stopped();
        }
    }
}

/// Source fed by a host through a `PushHandle`
pub struct PushSource {
    shared: Arc<Shared>,
}

/// Host side of a `PushSource`; cheap to clone
#[derive(Clone)]
pub struct PushHandle {
    shared: Arc<Shared>,
}

impl PushSource {
    pub fn new(name: impl Into<String>, mode: StopMode) -> (Self, PushHandle) {
        let shared = Arc::new(Shared {
            name: name.into(),
            mode,
            slot: Mutex::new(Slot::default()),
            stop_requested: AtomicBool::new(false),
        });
        let handle = PushHandle {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, handle)
    }

    pub fn handle(&self) -> PushHandle {
        PushHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl FrameSource for PushSource {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>, with_audio: bool) -> Result<(), MediaError> {
        let mut slot = self.shared.lock();
        if let Some(reason) = slot.refuse_next.take() {
            return Err(MediaError::SourceError(reason));
        }
        if slot.sink.is_some() {
            return Err(MediaError::SourceError(format!("{} is already capturing", self.shared.name)));
        }
        slot.sink = Some(sink);
        slot.with_audio = with_audio;
        self.shared.stop_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        if self.shared.lock().sink.is_none() {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::SeqCst);

        if self.shared.mode == StopMode::Immediate {
            // Confirm off the caller's thread, as a real capture facility would
            let shared = Arc::clone(&self.shared);
            let spawned = std::thread::Builder::new()
                .name("crabscreen-push-stop".to_string())
                .spawn(move || shared.halt());
            if let Err(e) = spawned {
                log::warn!("Failed to spawn stop confirmation thread: {}", e);
                self.shared.halt();
            }
        }
    }

    fn is_running(&self) -> bool {
        self.shared.lock().sink.is_some()
    }
}

impl PushHandle {
    /// Deliver a frame; `Dropped` when no capture is running
    pub fn push_video(&self, frame: VideoFrame) -> Delivery {
        match self.shared.current_sink() {
            Some(sink) => sink.on_video(frame),
            None => Delivery::Dropped,
        }
    }

    /// Deliver audio; `Dropped` when no capture is running or audio was not requested
    pub fn push_audio(&self, sample: AudioSample) -> Delivery {
        let sink = {
            let slot = self.shared.lock();
            if !slot.with_audio {
                return Delivery::Dropped;
            }
            slot.sink.clone()
        };
        match sink {
            Some(sink) => sink.on_audio(sample),
            None => Delivery::Dropped,
        }
    }

    /// Report a fatal capture error and end delivery
    pub fn fail(&self, error: MediaError) {
        let sink = self.shared.lock().sink.take();
        if let Some(sink) = sink {
            sink.on_error(error);
        }
    }

    /// Confirm a pending halt request (`StopMode::External`)
    pub fn confirm_stopped(&self) {
        if self.shared.stop_requested.swap(false, Ordering::SeqCst) {
            self.shared.halt();
        }
    }

    /// Make the next `start` fail with `reason`
    pub fn refuse_next_start(&self, reason: impl Into<String>) {
        self.shared.lock().refuse_next = Some(reason.into());
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().sink.is_some()
    }

    pub fn audio_enabled(&self) -> bool {
        self.shared.lock().with_audio
    }

    /// True between a halt request and its confirmation
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_video_frame;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        frames: AtomicUsize,
        stopped: AtomicUsize,
        errors: AtomicUsize,
    }

    impl FrameSink for Counter {
        fn on_video(&self, _frame: VideoFrame) -> Delivery {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Delivery::Accepted
        }

        fn on_audio(&self, _sample: AudioSample) -> Delivery {
            Delivery::Accepted
        }

        fn on_error(&self, _error: MediaError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stopped(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_push_before_start_is_dropped() {
        let (_source, handle) = PushSource::new("screen", StopMode::External);
        let frame = synthetic_video_frame(0, 8, 8, Duration::ZERO);
        assert_eq!(handle.push_video(frame), Delivery::Dropped);
    }

    #[test]
    fn test_external_stop_waits_for_confirmation() {
        let (mut source, handle) = PushSource::new("screen", StopMode::External);
        let sink = Arc::new(Counter::default());
        source.start(sink.clone(), false).unwrap();

        assert!(handle.push_video(synthetic_video_frame(0, 8, 8, Duration::ZERO)).is_accepted());
        source.stop();
        assert!(handle.stop_requested());
        assert_eq!(sink.stopped.load(Ordering::SeqCst), 0);

        handle.confirm_stopped();
        handle.confirm_stopped();
        assert_eq!(sink.stopped.load(Ordering::SeqCst), 1);
        assert!(!source.is_running());
    }

    #[test]
    fn test_immediate_stop_confirms_from_another_thread() {
        let (mut source, _handle) = PushSource::new("screen", StopMode::Immediate);
        let sink = Arc::new(Counter::default());
        source.start(sink.clone(), false).unwrap();
        source.stop();

        for _ in 0..100 {
            if sink.stopped.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refused_start() {
        let (mut source, handle) = PushSource::new("screen", StopMode::External);
        handle.refuse_next_start("permission denied");
        let sink = Arc::new(Counter::default());
        assert!(matches!(source.start(sink.clone(), false), Err(MediaError::SourceError(_))));
        // Refusal applies once
        assert!(source.start(sink, false).is_ok());
    }

    #[test]
    fn test_fail_ends_delivery() {
        let (mut source, handle) = PushSource::new("screen", StopMode::External);
        let sink = Arc::new(Counter::default());
        source.start(sink.clone(), false).unwrap();
        handle.fail(MediaError::SourceError("display disconnected".to_string()));
        assert_eq!(sink.errors.load(Ordering::SeqCst), 1);
        assert_eq!(handle.push_video(synthetic_video_frame(1, 8, 8, Duration::ZERO)), Delivery::Dropped);
    }
}
