//! Microphone capture via cpal
//!
//! Buffers arrive on cpal's callback thread and are handed over through a
//! bounded channel. Timestamps come from the shared `PTSClock`, so they line
//! up with screen frames stamped on the same clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use crate::errors::MediaError;
use crate::timing::PTSClock;
use crate::types::AudioSample;

/// About five seconds of 20 ms buffers
const MAX_BUFFERED: usize = 256;

/// Audio capture stream from a microphone
///
/// The underlying cpal stream is not `Send`; create and drop the capture on
/// the thread that consumes it.
pub struct AudioCapture {
    stream: Option<Stream>,
    receiver: crossbeam_channel::Receiver<AudioSample>,
    is_running: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl AudioCapture {
    /// Open an input device.
    ///
    /// `device` selects by name; `None` uses the system default input. The
    /// requested rate and channel count are used when the device accepts the
    /// common values, otherwise the device defaults apply.
    pub fn new(device: Option<&str>, sample_rate: u32, channels: u16, clock: PTSClock) -> Result<Self, MediaError> {
        let host = cpal::default_host();
        let input = match device {
            None | Some("") | Some("default") => host
                .default_input_device()
                .ok_or_else(|| MediaError::AudioError("No default audio input device".to_string()))?,
            Some(name) => host
                .input_devices()
                .map_err(|e| MediaError::AudioError(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| MediaError::AudioError(format!("Audio device not found: {}", name)))?,
        };
        let device_name = input.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = input
            .default_input_config()
            .map_err(|e| MediaError::AudioError(format!("No supported input config: {}", e)))?;

        let actual_rate = if sample_rate == 48000 || sample_rate == 44100 {
            sample_rate
        } else {
            supported.sample_rate().0
        };
        let actual_channels = if channels == 1 || channels == 2 {
            channels
        } else {
            supported.channels()
        };

        let config = StreamConfig {
            channels: actual_channels,
            sample_rate: cpal::SampleRate(actual_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (sender, receiver) = crossbeam_channel::bounded(MAX_BUFFERED);
        let is_running = Arc::new(AtomicBool::new(false));
        let running = Arc::clone(&is_running);

        let stream = input
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / actual_channels as usize;
                    let span = Duration::from_secs_f64(frames as f64 / actual_rate as f64);
                    let sample = AudioSample {
                        samples: data.to_vec(),
                        sample_rate: actual_rate,
                        channels: actual_channels,
                        // Stamp the first sample of the buffer, not its delivery
                        timestamp: clock.now().saturating_sub(span),
                    };
                    // Never block the audio callback; a full channel drops the buffer
                    let _ = sender.try_send(sample);
                },
                |err| {
                    log::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::AudioError(format!("Failed to build input stream: {}", e)))?;

        log::debug!("Opened audio input '{}' at {} Hz, {} ch", device_name, actual_rate, actual_channels);

        Ok(Self {
            stream: Some(stream),
            receiver,
            is_running,
            sample_rate: actual_rate,
            channels: actual_channels,
            device_name,
        })
    }

    /// Start capturing (idempotent)
    pub fn start(&mut self) -> Result<(), MediaError> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(ref stream) = self.stream {
            stream
                .play()
                .map_err(|e| MediaError::AudioError(format!("Failed to start stream: {}", e)))?;
            self.is_running.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Stop capturing (idempotent)
    pub fn stop(&mut self) -> Result<(), MediaError> {
        if !self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(ref stream) = self.stream {
            stream
                .pause()
                .map_err(|e| MediaError::AudioError(format!("Failed to stop stream: {}", e)))?;
            self.is_running.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Wait up to `timeout` for the next buffer
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AudioSample> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Take every buffer captured so far
    pub fn drain(&self) -> Vec<AudioSample> {
        self.receiver.try_iter().collect()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        let _ = self.stop();
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_idempotent() {
        // Only meaningful where an input device exists
        if let Ok(mut capture) = AudioCapture::new(None, 48000, 2, PTSClock::new()) {
            assert!(capture.start().is_ok());
            assert!(capture.start().is_ok());
            assert!(capture.stop().is_ok());
            assert!(capture.stop().is_ok());
        }
    }

    #[test]
    fn test_unknown_device_is_an_error() {
        let result = AudioCapture::new(Some("no-such-device-crabscreen"), 48000, 2, PTSClock::new());
        assert!(result.is_err());
    }
}
