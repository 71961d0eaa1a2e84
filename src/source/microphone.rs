//! Microphone audio alongside any screen source
//!
//! Video comes from the wrapped source; audio is read from a cpal input on a
//! forwarding thread and stamped on the shared clock. The wrapped source's
//! halt confirmation is held back until the forwarding thread has drained,
//! so no audio reaches the sink after `on_stopped`.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use super::{Delivery, FrameSink, FrameSource};
use crate::audio::AudioCapture;
use crate::errors::MediaError;
use crate::timing::PTSClock;
use crate::types::{AudioSample, VideoFrame};

enum MicCommand {
    /// Stop reading; `confirm` forwards the halt to the sink afterwards
    Halt { confirm: bool },
}

/// Screen source with microphone audio
pub struct MicrophoneSource {
    inner: Box<dyn FrameSource>,
    device: Option<String>,
    sample_rate: u32,
    channels: u16,
    clock: PTSClock,
    control: Option<Sender<MicCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    /// `clock` must be the clock `inner` stamps its frames with
    pub fn new(inner: Box<dyn FrameSource>, device: Option<String>, clock: PTSClock) -> Self {
        Self {
            inner,
            device,
            sample_rate: 48000,
            channels: 2,
            clock,
            control: None,
            worker: None,
        }
    }

    /// Preferred capture format; the device default is used when unsupported
    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    fn spawn_microphone(&mut self, sink: Arc<dyn FrameSink>) -> Result<Sender<MicCommand>, MediaError> {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Previous microphone thread panicked");
            }
        }

        let (control_tx, control_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let device = self.device.clone();
        let (rate, channels, clock) = (self.sample_rate, self.channels, self.clock.clone());

        let worker = std::thread::Builder::new()
            .name("crabscreen-microphone".to_string())
            .spawn(move || {
                // cpal streams are not Send: open the device on this thread
                let capture = AudioCapture::new(device.as_deref(), rate, channels, clock)
                    .and_then(|mut capture| capture.start().map(|_| capture));
                match capture {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(()));
                        forward_loop(&capture, sink.as_ref(), &control_rx);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| MediaError::SourceError(format!("Failed to spawn microphone thread: {}", e)))?;
        self.worker = Some(worker);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(control_tx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaError::AudioError("Microphone thread exited during start".to_string())),
        }
    }
}

impl FrameSource for MicrophoneSource {
    fn name(&self) -> &str {
        "microphone"
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>, with_audio: bool) -> Result<(), MediaError> {
        if !with_audio {
            return self.inner.start(sink, false);
        }

        let control = self.spawn_microphone(Arc::clone(&sink))?;
        let relay = Arc::new(HaltRelay {
            outer: sink,
            control: Mutex::new(Some(control.clone())),
        });

        if let Err(e) = self.inner.start(relay, false) {
            let _ = control.send(MicCommand::Halt { confirm: false });
            return Err(e);
        }
        self.control = Some(control);
        Ok(())
    }

    fn stop(&mut self) {
        self.control = None;
        self.inner.stop();
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// Sink handed to the wrapped source: passes samples through and routes the
/// halt confirmation via the microphone thread
struct HaltRelay {
    outer: Arc<dyn FrameSink>,
    control: Mutex<Option<Sender<MicCommand>>>,
}

impl HaltRelay {
    fn halt_microphone(&self, confirm: bool) -> bool {
        let control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match control {
            Some(tx) => tx.send(MicCommand::Halt { confirm }).is_ok(),
            None => false,
        }
    }
}

impl FrameSink for HaltRelay {
    fn on_video(&self, frame: VideoFrame) -> Delivery {
        self.outer.on_video(frame)
    }

    fn on_audio(&self, sample: AudioSample) -> Delivery {
        self.outer.on_audio(sample)
    }

    fn on_error(&self, error: MediaError) {
        self.halt_microphone(false);
        self.outer.on_error(error);
    }

    fn on_stopped(&self) {
        if !self.halt_microphone(true) {
            // Microphone thread already gone
            self.outer.on_stopped();
        }
    }
}

fn forward_loop(capture: &AudioCapture, sink: &dyn FrameSink, control: &Receiver<MicCommand>) {
    let mut dropped = 0u64;
    let confirm = loop {
        match control.try_recv() {
            Ok(MicCommand::Halt { confirm }) => break confirm,
            Err(TryRecvError::Disconnected) => break false,
            Err(TryRecvError::Empty) => {}
        }
        if let Some(sample) = capture.recv_timeout(Duration::from_millis(20)) {
            if sink.on_audio(sample) == Delivery::Dropped {
                dropped += 1;
            }
        }
    };

    if confirm {
        for sample in capture.drain() {
            let _ = sink.on_audio(sample);
        }
    }
    if dropped > 0 {
        log::debug!("Microphone: {} buffers dropped by the sink", dropped);
    }
    if confirm {
        sink.on_stopped();
    }
}
