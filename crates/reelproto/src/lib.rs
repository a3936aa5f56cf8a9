//! reelproto - Message types for tabreel recording sessions
//!
//! Collaborators (the capture process, the protocol inspector, the on-page
//! listener and the display surface) talk to the recorder core with JSON
//! messages shaped like:
//!
//! ```json
//! {"type": "session-start", "payload": {"targetId": "42"}, "timestamp": 1700000000000, "correlationId": "c-1"}
//! ```
//!
//! - `domain` holds identifiers, session status and counters
//! - `records` holds the telemetry records persisted in batches
//! - `messages` holds the inbound and outbound message payloads
//! - `envelope` wraps a message with its timestamp and correlation id

pub mod domain;
pub mod envelope;
pub mod messages;
pub mod records;

pub use domain::{
    CapabilityState, CaptureStage, SessionCounts, SessionFailure, SessionId, SessionStatus,
    TargetId,
};
pub use envelope::{Envelope, ProtocolError};
pub use messages::{
    ConsoleEntry, DomInteraction, Inbound, LoadFailed, Outbound, PageState, Reply, RequestSent,
    ResponseReceived, StatusReport, StoredBlob,
};
pub use records::{
    Channel, ConsoleEvent, ConsoleLevel, DomEvent, FailureFields, Headers, NetworkEvent,
    RequestFields, ResourceType, ResponseFields,
};
