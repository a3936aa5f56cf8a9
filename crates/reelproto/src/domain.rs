//! Identifiers and status values shared by every participant in a recording.

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of the instrumented target (a browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one recording session.
///
/// Derived from the target and the session start instant, so two sessions for
/// the same target never share an id unless they start in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the id for a session on `target` whose T0 is `start_time_ms`.
    pub fn derive(target: &TargetId, start_time_ms: i64) -> Self {
        Self(format!("{}-{}", target.as_str(), start_time_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle status of a session.
///
/// ```text
/// idle -> recording -> stopping -> completed
///   \________\____________\-------> error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Recording,
    Stopping,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Recording => "recording",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    /// Completed and error are final; nothing leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    /// A session that still owns its target.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle, Recording)
                | (Recording, Stopping)
                | (Stopping, Completed)
                | (Idle, Error)
                | (Recording, Error)
                | (Stopping, Error)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Counters and capabilities
// ============================================================================

/// Running totals for a session. Only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub chunk_count: u64,
    pub screenshot_count: u64,
    pub network_count: u64,
    pub console_count: u64,
    pub dom_count: u64,
}

/// What the capture collaborator managed to acquire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityState {
    /// The capture surface (tab video) is live.
    pub capture_surface: bool,
    /// Tab audio is routed into the recording.
    pub tab_audio: bool,
    /// Microphone is mixed into the recording.
    pub microphone: bool,
    /// The protocol debugger is attached for network capture.
    pub debugger: bool,
}

/// Stage at which the capture collaborator reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureStage {
    /// Acquiring streams or starting the encoder; no data exists yet.
    Initialization,
    /// The encoder or a telemetry channel failed mid-recording.
    Recording,
    /// Finalizing the encoder after stop.
    Finalization,
}

impl CaptureStage {
    /// Failures before any data existed cannot be salvaged.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CaptureStage::Initialization)
    }
}

/// Terminal error attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFailure {
    pub message: String,
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_derivation() {
        let id = SessionId::derive(&TargetId::from("tab-7"), 1_700_000_000_123);
        assert_eq!(id.as_str(), "tab-7-1700000000123");
    }

    #[test]
    fn test_forward_transitions() {
        use SessionStatus::*;
        assert!(Idle.can_transition_to(Recording));
        assert!(Recording.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Completed));
        assert!(Recording.can_transition_to(Error));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        use SessionStatus::*;
        assert!(!Completed.can_transition_to(Recording));
        assert!(!Stopping.can_transition_to(Recording));
        assert!(!Recording.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Error));
        assert!(!Error.can_transition_to(Error));
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }

    #[test]
    fn test_initialization_failures_are_not_recoverable() {
        assert!(!CaptureStage::Initialization.is_recoverable());
        assert!(CaptureStage::Recording.is_recoverable());
        assert!(CaptureStage::Finalization.is_recoverable());
    }
}
