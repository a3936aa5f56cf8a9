//! Recording tunables - seed the session core at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffering, flushing and shutdown timing for recording sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Buffered events per channel that trigger an immediate flush.
    /// Default: 50
    #[serde(default = "RecordingConfig::default_flush_threshold")]
    pub flush_threshold: usize,

    /// Period of the background flush timer.
    /// Default: 10000
    #[serde(default = "RecordingConfig::default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Age after which an unanswered request is evicted.
    /// Default: 120000
    #[serde(default = "RecordingConfig::default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,

    /// How long a stop waits for the capture side to finish.
    /// Default: 5000
    #[serde(default = "RecordingConfig::default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Outbound broadcast queue depth per subscriber.
    /// Default: 256
    #[serde(default = "RecordingConfig::default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl RecordingConfig {
    fn default_flush_threshold() -> usize {
        50
    }

    fn default_flush_interval_ms() -> u64 {
        10_000
    }

    fn default_pending_ttl_ms() -> u64 {
        120_000
    }

    fn default_stop_timeout_ms() -> u64 {
        5_000
    }

    fn default_broadcast_capacity() -> usize {
        256
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_ttl_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            flush_threshold: Self::default_flush_threshold(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            pending_ttl_ms: Self::default_pending_ttl_ms(),
            stop_timeout_ms: Self::default_stop_timeout_ms(),
            broadcast_capacity: Self::default_broadcast_capacity(),
        }
    }
}
