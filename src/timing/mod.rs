//! Timing utilities for presentation timestamps
//!
//! `PTSClock` is the monotonic timebase capture sources stamp samples with.
//! `TimestampOrigin` turns those source-relative stamps into container time:
//! the first stamp observed on either track becomes zero, and every later
//! stamp on both tracks is expressed against that same origin.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::Track;

/// Monotonic clock for presentation timestamps
///
/// Sources that should stay in sync (screen and microphone) must share one
/// clock, either by cloning it or via `from_instant`.
#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Elapsed time since the clock was created
    #[inline]
    pub fn now(&self) -> Duration {
        self.start.elapsed()
    }

    /// Presentation timestamp in seconds
    #[inline]
    pub fn pts(&self) -> f64 {
        self.now().as_secs_f64()
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a timestamp could not be placed on the container timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampRejection {
    /// Earlier than the session origin established by the other track
    BeforeOrigin,
    /// Earlier than the last accepted timestamp on the same track
    Regressed,
}

/// Shared time origin for all tracks of one container
#[derive(Debug, Default, Clone)]
pub struct TimestampOrigin {
    origin: Option<Duration>,
    first_track: Option<Track>,
    last: [Option<Duration>; 2],
}

impl TimestampOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// The source timestamp that maps to container time zero, once established
    pub fn origin(&self) -> Option<Duration> {
        self.origin
    }

    /// Track whose sample established the origin
    pub fn first_track(&self) -> Option<Track> {
        self.first_track
    }

    /// Map a source timestamp onto the container timeline.
    ///
    /// The first call (on any track) fixes the origin. The returned offset is not
    /// recorded as the track's last position until `commit` is called, so a
    /// sample the writer refuses does not advance the track.
    pub fn rebase(&mut self, track: Track, timestamp: Duration) -> Result<Duration, TimestampRejection> {
        let origin = match self.origin {
            Some(origin) => origin,
            None => {
                self.origin = Some(timestamp);
                self.first_track = Some(track);
                timestamp
            }
        };

        let relative = timestamp
            .checked_sub(origin)
            .ok_or(TimestampRejection::BeforeOrigin)?;

        match self.last[track.index()] {
            Some(last) if relative < last => Err(TimestampRejection::Regressed),
            _ => Ok(relative),
        }
    }

    /// Record `relative` as the last accepted position on `track`
    pub fn commit(&mut self, track: Track, relative: Duration) {
        self.last[track.index()] = Some(relative);
    }

    pub fn last(&self, track: Track) -> Option<Duration> {
        self.last[track.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pts_monotonic() {
        let clock = PTSClock::new();
        let pts1 = clock.pts();
        thread::sleep(Duration::from_millis(10));
        let pts2 = clock.pts();
        assert!(pts2 > pts1, "PTS must be monotonically increasing");
    }

    #[test]
    fn test_shared_clock() {
        let clock1 = PTSClock::new();
        let clock2 = PTSClock::from_instant(clock1.start_instant());
        thread::sleep(Duration::from_millis(5));
        assert!((clock1.pts() - clock2.pts()).abs() < 0.001);
    }

    #[test]
    fn test_origin_from_first_track() {
        let mut origin = TimestampOrigin::new();
        let audio = origin.rebase(Track::Audio, Duration::from_millis(500)).unwrap();
        assert_eq!(audio, Duration::ZERO);
        assert_eq!(origin.origin(), Some(Duration::from_millis(500)));
        assert_eq!(origin.first_track(), Some(Track::Audio));

        let video = origin.rebase(Track::Video, Duration::from_millis(540)).unwrap();
        assert_eq!(video, Duration::from_millis(40));
    }

    #[test]
    fn test_before_origin_rejected() {
        let mut origin = TimestampOrigin::new();
        origin.rebase(Track::Video, Duration::from_secs(2)).unwrap();
        assert_eq!(
            origin.rebase(Track::Audio, Duration::from_millis(1999)),
            Err(TimestampRejection::BeforeOrigin)
        );
    }

    #[test]
    fn test_regression_is_per_track() {
        let mut origin = TimestampOrigin::new();
        let v = origin.rebase(Track::Video, Duration::from_millis(100)).unwrap();
        origin.commit(Track::Video, v);
        let v = origin.rebase(Track::Video, Duration::from_millis(200)).unwrap();
        origin.commit(Track::Video, v);

        // Audio has its own position and may sit behind video
        let a = origin.rebase(Track::Audio, Duration::from_millis(150)).unwrap();
        origin.commit(Track::Audio, a);

        assert_eq!(
            origin.rebase(Track::Video, Duration::from_millis(150)),
            Err(TimestampRejection::Regressed)
        );
        // Equal timestamps are non-decreasing
        assert!(origin.rebase(Track::Video, Duration::from_millis(200)).is_ok());
    }

    #[test]
    fn test_uncommitted_sample_does_not_advance() {
        let mut origin = TimestampOrigin::new();
        let first = origin.rebase(Track::Video, Duration::from_millis(10)).unwrap();
        origin.commit(Track::Video, first);
        let _dropped = origin.rebase(Track::Video, Duration::from_millis(50)).unwrap();
        assert!(origin.rebase(Track::Video, Duration::from_millis(30)).is_ok());
    }
}
