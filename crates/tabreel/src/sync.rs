//! Timestamp synchronization onto the video-relative time axis.
//!
//! Three clocks feed a recording: the capture surface, the network inspector
//! (wall clock in fractional seconds) and page content (wall clock in ms).
//! Every event is converted at the boundary into a signed offset from the
//! session start T0, so downstream consumers never see raw clocks.
//!
//! Offsets are never clamped. An event observed before T0 has a negative
//! offset, and one observed after the session stopped can exceed its length.

use std::sync::atomic::{AtomicI64, Ordering};

/// Offset of a wall-clock reading in milliseconds.
pub fn video_offset_ms(wall_ms: i64, t0: i64) -> i64 {
    wall_ms - t0
}

/// Offset of a wall-clock reading in fractional seconds (network inspector units).
pub fn video_offset_from_secs(wall_secs: f64, t0: i64) -> i64 {
    (wall_secs * 1000.0).round() as i64 - t0
}

/// Source of wall-clock time, in milliseconds since the epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
