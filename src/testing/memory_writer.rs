//! Track writer that records what it was asked to write
//!
//! Used to observe muxer ordering, timestamps and backpressure without
//! running the codecs. The writer can be held back by a gate to fill the
//! muxer queues, and can be told to fail.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};

use crate::errors::MediaError;
use crate::recording::{RecordingConfig, TrackWriter, WriterFactory, WriterStats};
use crate::types::{AudioSample, VideoFrame};

/// One call observed by the memory writer
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEvent {
    Video { pts: f64 },
    Audio { pts: f64, frames: usize },
    Finished,
}

#[derive(Debug, Default)]
struct Record {
    events: Vec<WriteEvent>,
    paths: Vec<PathBuf>,
}

/// Factory for in-memory writers sharing one event log
#[derive(Clone, Default)]
pub struct MemoryWriterFactory {
    record: Arc<Mutex<Record>>,
    gate: Option<Receiver<()>>,
    fail_video_at: Option<u64>,
    fail_create: bool,
    fail_finish: bool,
}

impl MemoryWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writers block before every write until the returned sender is dropped
    pub fn gated() -> (Self, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let factory = Self {
            gate: Some(rx),
            ..Self::default()
        };
        (factory, tx)
    }

    /// Fail when asked to write the `n`th video frame (0-based)
    pub fn failing_video_at(mut self, n: u64) -> Self {
        self.fail_video_at = Some(n);
        self
    }

    /// Refuse to open any container
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Fail when the container is finalized
    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn events(&self) -> Vec<WriteEvent> {
        self.lock().events.clone()
    }

    pub fn video_pts(&self) -> Vec<f64> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                WriteEvent::Video { pts } => Some(*pts),
                _ => None,
            })
            .collect()
    }

    pub fn audio_pts(&self) -> Vec<f64> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                WriteEvent::Audio { pts, .. } => Some(*pts),
                _ => None,
            })
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, WriteEvent::Finished))
            .count()
    }

    /// Paths of every container opened through this factory
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().paths.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn create(&self, path: &Path, _config: &RecordingConfig) -> Result<Box<dyn TrackWriter>, MediaError> {
        if self.fail_create {
            return Err(MediaError::IoError(format!("Cannot open {}", path.display())));
        }
        let file = File::create(path)
            .map_err(|e| MediaError::IoError(format!("Failed to create output file {}: {}", path.display(), e)))?;
        self.lock().paths.push(path.to_path_buf());

        Ok(Box::new(MemoryWriter {
            file,
            factory: self.clone(),
            video_frames: 0,
            audio_frames: 0,
            last_pts: 0.0,
        }))
    }
}

struct MemoryWriter {
    file: File,
    factory: MemoryWriterFactory,
    video_frames: u64,
    audio_frames: u64,
    last_pts: f64,
}

impl MemoryWriter {
    fn wait_for_gate(&self) {
        if let Some(ref gate) = self.factory.gate {
            // Returns once the sender side is dropped
            while gate.recv().is_ok() {}
        }
    }
}

impl TrackWriter for MemoryWriter {
    fn write_video(&mut self, pts: f64, _frame: &VideoFrame) -> Result<(), MediaError> {
        self.wait_for_gate();
        if self.factory.fail_video_at == Some(self.video_frames) {
            return Err(MediaError::EncodingError(format!(
                "Injected failure at video frame {}",
                self.video_frames
            )));
        }
        self.video_frames += 1;
        self.last_pts = self.last_pts.max(pts);
        self.factory.lock().events.push(WriteEvent::Video { pts });
        Ok(())
    }

    fn write_audio(&mut self, pts: f64, sample: &AudioSample) -> Result<(), MediaError> {
        self.wait_for_gate();
        self.audio_frames += 1;
        self.last_pts = self.last_pts.max(pts);
        self.factory.lock().events.push(WriteEvent::Audio {
            pts,
            frames: sample.frames(),
        });
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<WriterStats, MediaError> {
        if self.factory.fail_finish {
            return Err(MediaError::MuxingError("Injected failure writing the index".to_string()));
        }
        let summary = format!("video={} audio={}\n", self.video_frames, self.audio_frames);
        self.file.write_all(summary.as_bytes())?;
        self.file.flush()?;
        self.factory.lock().events.push(WriteEvent::Finished);

        Ok(WriterStats {
            video_frames: self.video_frames,
            audio_frames: self.audio_frames,
            duration_secs: self.last_pts,
            bytes_written: summary.len() as u64,
        })
    }
}
