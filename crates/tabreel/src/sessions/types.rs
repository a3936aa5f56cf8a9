//! Domain types for recording sessions.

use std::collections::BTreeMap;

use reelproto::{
    Channel, SessionCounts, SessionFailure, SessionId, SessionStatus, StatusReport, TargetId,
};
use serde::{Deserialize, Serialize};

use crate::correlator::CorrelationStats;

/// What was asked for and what the capture side managed to acquire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub wants_audio: bool,
    pub wants_mic: bool,
    pub debugger_attached: bool,
    pub capture_surface_active: bool,
    /// The microphone was requested but could not be acquired.
    pub mic_failed: bool,
}

impl Capabilities {
    pub fn requested(wants_audio: bool, wants_mic: bool) -> Self {
        Self {
            wants_audio,
            wants_mic,
            ..Default::default()
        }
    }
}

/// One bounded recording episode of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub target_id: TargetId,
    pub status: SessionStatus,
    /// T0, wall clock milliseconds. Never changes.
    pub start_time: i64,
    /// Set once, on the first move to stopping or a terminal status.
    pub stop_time: Option<i64>,
    pub counts: SessionCounts,
    pub capabilities: Capabilities,
    pub error: Option<SessionFailure>,
}

impl Session {
    pub fn new(session_id: SessionId, target_id: TargetId, start_time: i64, capabilities: Capabilities) -> Self {
        Self {
            session_id,
            target_id,
            status: SessionStatus::Idle,
            start_time,
            stop_time: None,
            counts: SessionCounts::default(),
            capabilities,
            error: None,
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            target_id: self.target_id.clone(),
            status: self.status,
            session_id: Some(self.session_id.clone()),
            counts: self.counts,
            mic_failed: self
                .capabilities
                .wants_mic
                .then_some(self.capabilities.mic_failed),
            start_time: Some(self.start_time),
            stop_time: self.stop_time,
            error: self.error.clone(),
        }
    }

    /// Bump the counter for an accepted event on `channel`.
    pub fn count(&mut self, channel: Channel) {
        match channel {
            Channel::Network => self.counts.network_count += 1,
            Channel::Console => self.counts.console_count += 1,
            Channel::Dom => self.counts.dom_count += 1,
        }
    }
}

/// Session record persisted under `{sessionId}:metadata` and the target's
/// last-session key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub correlation: CorrelationStats,
    /// Batches written per channel. Channel `c` has batches `0..batches[c]`.
    pub batches: BTreeMap<Channel, u64>,
}

/// Which sessions [`find_by_target`](super::SessionRegistry::find_by_target)
/// should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Any,
    /// Any non-terminal status.
    Active,
    Is(SessionStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: SessionStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Active => status.is_active(),
            StatusFilter::Is(s) => *s == status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(wants_mic: bool) -> Session {
        Session::new(
            SessionId::from("9-1000"),
            TargetId::from("9"),
            1000,
            Capabilities::requested(true, wants_mic),
        )
    }

    #[test]
    fn test_status_report_carries_counts() {
        let mut s = session(false);
        s.count(Channel::Network);
        s.count(Channel::Network);
        s.count(Channel::Dom);

        let report = s.status_report();
        assert_eq!(report.counts.network_count, 2);
        assert_eq!(report.counts.dom_count, 1);
        assert_eq!(report.start_time, Some(1000));
        assert_eq!(report.mic_failed, None);
    }

    #[test]
    fn test_mic_failed_reported_only_when_requested() {
        let mut s = session(true);
        s.capabilities.mic_failed = true;
        assert_eq!(s.status_report().mic_failed, Some(true));
    }

    #[test]
    fn test_summary_flattens_session() {
        let summary = SessionSummary {
            session: session(false),
            correlation: CorrelationStats::default(),
            batches: Channel::ALL.iter().map(|c| (*c, 0)).collect(),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["sessionId"], "9-1000");
        assert_eq!(value["status"], "idle");
        assert_eq!(value["batches"]["network"], 0);
        assert_eq!(value["correlation"]["unknownResponses"], 0);
    }

    #[test]
    fn test_status_filter() {
        assert!(StatusFilter::Active.matches(SessionStatus::Stopping));
        assert!(!StatusFilter::Active.matches(SessionStatus::Completed));
        assert!(StatusFilter::Is(SessionStatus::Error).matches(SessionStatus::Error));
        assert!(StatusFilter::Any.matches(SessionStatus::Completed));
    }
}
