//! Host-facing control operations
//!
//! The control surface acts on one process-wide controller, so everything
//! runs in a single test to keep the steps ordered.
//!
//! Run with: cargo test --test control_surface_test

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crabscreen::config::RecorderConfig;
use crabscreen::control;
use crabscreen::recording::AudioPolicy;
use crabscreen::session::{SessionController, SessionState};
use crabscreen::source::{PushSource, StopMode};
use crabscreen::testing::{synthetic_audio_sample, synthetic_video_frame, MemoryWriterFactory};

fn config(dir: &Path, policy: AudioPolicy) -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.video.width = 32;
    config.video.height = 32;
    config.audio.policy = policy;
    config.storage.output_directory = Some(dir.to_path_buf());
    config.pipeline.video_queue_capacity = 64;
    config.pipeline.audio_queue_capacity = 64;
    config
}

#[tokio::test]
async fn test_control_surface_sequence() {
    let dir = tempdir().expect("Create temp dir");

    // Nothing installed yet
    assert_eq!(control::recording_state(), SessionState::Idle);
    let err = control::start_record_screen("clip1", "", "").expect_err("no recorder");
    assert_eq!(err.code, "NOT_INITIALIZED");
    let err = control::stop_record_screen().await.expect_err("no recorder");
    assert_eq!(err.code, "NOT_INITIALIZED");

    // Video only
    let factory = MemoryWriterFactory::new();
    let (source, handle) = PushSource::new("screen", StopMode::Immediate);
    let installed = control::install(SessionController::new(
        config(dir.path(), AudioPolicy::None),
        Box::new(source),
        Arc::new(factory.clone()),
    ));
    assert!(control::installed().is_some());

    let err = control::stop_record_screen().await.expect_err("idle");
    assert_eq!(err.code, "INVALID_STATE");

    assert!(control::start_record_screen("clip1", "Demo", "first take").expect("start"));
    for i in 0..30u64 {
        handle.push_video(synthetic_video_frame(i, 32, 32, Duration::from_millis(i * 33)));
    }
    assert_eq!(control::recording_state(), SessionState::Capturing);

    let err = control::start_record_screen("clip9", "", "").expect_err("busy");
    assert_eq!(err.code, "INVALID_STATE");

    let path = control::stop_record_screen().await.expect("stop");
    assert!(path.ends_with("clip1.mp4"), "{}", path);
    assert!(std::fs::metadata(&path).expect("output exists").len() > 0);
    assert_eq!(installed.state(), SessionState::Idle);

    let err = control::start_record_screen("", "", "").expect_err("empty name");
    assert_eq!(err.code, "INVALID_ARGUMENT");

    // Audio requested while the configured policy is `none` falls back to a muxed track
    assert!(control::start_record_screen_and_audio("clip2", "", "").expect("start"));
    assert!(handle.audio_enabled());
    assert_eq!(
        installed.session_info().map(|i| i.audio_policy),
        Some(AudioPolicy::MuxedTrack)
    );
    handle.push_audio(synthetic_audio_sample(0, 960, 2, Duration::ZERO));
    handle.push_video(synthetic_video_frame(0, 32, 32, Duration::from_millis(10)));
    let path = control::stop_record_screen().await.expect("stop");
    assert!(path.ends_with("clip2.mp4"));
    assert_eq!(factory.audio_pts().len(), 1);

    // Configured independent file
    let (source, handle) = PushSource::new("screen", StopMode::Immediate);
    control::install(SessionController::new(
        config(dir.path(), AudioPolicy::IndependentFile),
        Box::new(source),
        Arc::new(MemoryWriterFactory::new()),
    ));
    assert!(control::start_record_screen_and_audio("clip3", "", "").expect("start"));
    handle.push_audio(synthetic_audio_sample(0, 960, 2, Duration::ZERO));
    let path = control::stop_record_screen().await.expect("stop");
    assert!(path.ends_with("clip3.mp4"));
    assert!(dir.path().join("audio.m4a").exists());

    // Refused capture crosses the boundary with its detail
    handle.refuse_next_start("permission denied");
    let err = control::start_record_screen("clip4", "", "").expect_err("refused");
    assert_eq!(err.code, "CAPTURE_START_FAILED");
    assert!(err.details.unwrap_or_default().contains("permission denied"));
    assert_eq!(control::recording_state(), SessionState::Idle);

    assert!(control::uninstall().is_some());
    assert!(control::installed().is_none());
}
