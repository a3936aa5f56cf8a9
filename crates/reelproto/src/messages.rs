//! Inbound and outbound message payloads.
//!
//! Inbound messages come from the capture collaborator, the protocol
//! inspector, the on-page listener and the display surface. Outbound messages
//! are status broadcasts and control messages forwarded to collaborators.
//!
//! On the wire every message is `{"type": "...", "payload": {...}}` inside an
//! [`Envelope`](crate::Envelope).

use crate::domain::{
    CaptureStage, CapabilityState, SessionCounts, SessionFailure, SessionId, SessionStatus,
    TargetId,
};
use crate::records::{ConsoleLevel, FailureFields, RequestFields, ResponseFields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Inbound
// ============================================================================

/// Messages handled by the session event router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Inbound {
    /// Begin recording a target. Replies with the new session id.
    SessionStart {
        target_id: TargetId,
        #[serde(default)]
        wants_audio: bool,
        #[serde(default)]
        wants_mic: bool,
    },

    /// Stop the active session for a target.
    SessionStop { target_id: TargetId },

    /// Report the live or last known session for a target.
    StatusQuery { target_id: TargetId },

    /// The capture collaborator acquired its streams.
    CaptureReady {
        session_id: SessionId,
        #[serde(default)]
        capability_state: CapabilityState,
        #[serde(default)]
        mic_failed: bool,
    },

    /// The capture collaborator failed.
    CaptureError {
        session_id: SessionId,
        stage: CaptureStage,
        error: String,
    },

    /// The capture collaborator delivered its final data.
    CaptureFinished {
        session_id: SessionId,
        #[serde(default)]
        final_count: u64,
    },

    /// The protocol debugger was detached (tab closed, user dismissed it).
    DebuggerDetached {
        session_id: SessionId,
        #[serde(default)]
        reason: Option<String>,
    },

    /// A media chunk was written to the blob store.
    ChunkStored(StoredBlob),

    /// A screenshot was written to the blob store.
    ScreenshotStored(StoredBlob),

    NetworkRequest(RequestSent),
    NetworkResponse(ResponseReceived),
    NetworkFailed(LoadFailed),
    Console(ConsoleEntry),
    Dom(DomInteraction),

    /// Serialized page storage and cookies.
    StateSnapshot(PageState),
}

impl Inbound {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::SessionStart { .. } => "session-start",
            Inbound::SessionStop { .. } => "session-stop",
            Inbound::StatusQuery { .. } => "status-query",
            Inbound::CaptureReady { .. } => "capture-ready",
            Inbound::CaptureError { .. } => "capture-error",
            Inbound::CaptureFinished { .. } => "capture-finished",
            Inbound::DebuggerDetached { .. } => "debugger-detached",
            Inbound::ChunkStored(_) => "chunk-stored",
            Inbound::ScreenshotStored(_) => "screenshot-stored",
            Inbound::NetworkRequest(_) => "network-request",
            Inbound::NetworkResponse(_) => "network-response",
            Inbound::NetworkFailed(_) => "network-failed",
            Inbound::Console(_) => "console",
            Inbound::Dom(_) => "dom",
            Inbound::StateSnapshot(_) => "state-snapshot",
        }
    }

    /// Messages that expect a [`Reply`]. Everything else is fire-and-forget.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Inbound::SessionStart { .. } | Inbound::SessionStop { .. } | Inbound::StatusQuery { .. }
        )
    }
}

/// Notification that a binary payload landed in the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    pub session_id: SessionId,
    pub storage_key: String,
    pub index: u64,
    /// Wall clock of the capture, milliseconds since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSent {
    pub session_id: SessionId,
    #[serde(default)]
    pub request_id: String,
    #[serde(flatten)]
    pub fields: RequestFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub session_id: SessionId,
    pub request_id: String,
    #[serde(flatten)]
    pub fields: ResponseFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadFailed {
    pub session_id: SessionId,
    pub request_id: String,
    #[serde(flatten)]
    pub fields: FailureFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub session_id: SessionId,
    #[serde(default)]
    pub level: ConsoleLevel,
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    /// Wall clock, milliseconds since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomInteraction {
    pub session_id: SessionId,
    pub kind: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    /// Wall clock, milliseconds since the epoch.
    pub timestamp: i64,
}

/// Page storage and cookies at the time of serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub session_id: SessionId,
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
    #[serde(default)]
    pub session_storage: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
}

// ============================================================================
// Outbound
// ============================================================================

/// Messages emitted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Outbound {
    /// Session status changed.
    Status(StatusReport),

    /// A session-level failure.
    Error {
        target_id: TargetId,
        error: String,
        recoverable: bool,
    },

    /// Ask the capture collaborator to acquire streams.
    StartCapture {
        session_id: SessionId,
        target_id: TargetId,
        wants_audio: bool,
        wants_mic: bool,
    },

    /// Ask the capture collaborator to finalize and release streams.
    StopCapture { session_id: SessionId },

    /// Ask the on-page listener to begin observing interactions.
    StartPageRecording {
        session_id: SessionId,
        start_time: i64,
    },

    /// Ask the on-page listener to stop observing.
    StopPageRecording { session_id: SessionId },

    /// Ask the on-page listener to send a [`PageState`] snapshot.
    SerializePage { session_id: SessionId },

    /// Answer to a request message, matched by the envelope correlation id.
    Reply(Reply),
}

/// Status of the session attached to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub target_id: TargetId,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub counts: SessionCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_failed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionFailure>,
}

impl StatusReport {
    /// Placeholder for a target that has never been recorded.
    pub fn idle(target_id: TargetId) -> Self {
        Self {
            target_id,
            status: SessionStatus::Idle,
            session_id: None,
            counts: SessionCounts::default(),
            mic_failed: None,
            start_time: None,
            stop_time: None,
            error: None,
        }
    }
}

/// Reply to a request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Reply {
    /// A session was created.
    Started { session_id: SessionId },

    /// Status query result.
    Status(StatusReport),

    /// Request accepted; the outcome is broadcast later.
    Ack { message: String },

    /// Request rejected.
    Error { message: String },
}

impl Reply {
    pub fn ack(message: impl Into<String>) -> Self {
        Self::Ack {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }
}
