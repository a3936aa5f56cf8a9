//! Recording tunables consumed by the session core.

use reelconf::RecordingConfig;
use std::time::Duration;

/// Buffering and timing limits for every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSettings {
    /// Buffered events in one channel that trigger a flush.
    pub flush_threshold: usize,
    /// Period of the background flush timer while recording.
    pub flush_interval: Duration,
    /// Age at which an unanswered request is dropped by the flush sweep.
    pub pending_ttl: Duration,
    /// Bounded wait for the capture side to deliver its final data on stop.
    pub stop_timeout: Duration,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self::from(&RecordingConfig::default())
    }
}

impl From<&RecordingConfig> for RecordingSettings {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            flush_threshold: config.flush_threshold.max(1),
            flush_interval: config.flush_interval(),
            pending_ttl: config.pending_ttl(),
            stop_timeout: config.stop_timeout(),
        }
    }
}
