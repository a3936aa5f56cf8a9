//! Message envelope and decode errors.
//!
//! Every message on the wire carries the sender's wall-clock timestamp and,
//! for requests that expect a reply, a correlation id the reply echoes back.

use crate::messages::{Inbound, Outbound, Reply};
use serde::{Deserialize, Serialize};

/// A message plus its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    #[serde(flatten)]
    pub message: M,
    /// Sender wall clock, milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
}

impl<M> Envelope<M> {
    pub fn new(message: M, timestamp: i64) -> Self {
        Self {
            message,
            timestamp,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

impl Envelope<Outbound> {
    /// Wrap a reply so it can be matched to the request it answers.
    pub fn reply_to(request: &Envelope<Inbound>, reply: Reply, timestamp: i64) -> Self {
        Self {
            message: Outbound::Reply(reply),
            timestamp,
            correlation_id: request.correlation_id.clone(),
        }
    }
}

impl<M: Serialize> Envelope<M> {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl Envelope<Inbound> {
    /// Decode an inbound envelope from a text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload { kind, source })
    }
}

/// Failure to encode or decode an envelope.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("message has no type tag")]
    MissingType,

    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SessionId, TargetId};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_request_with_correlation() {
        let env = Envelope::<Inbound>::from_json(
            r#"{"type":"session-stop","payload":{"targetId":"3"},"timestamp":1700,"correlationId":"c-9"}"#,
        )
        .unwrap();

        assert_eq!(
            env.message,
            Inbound::SessionStop {
                target_id: TargetId::from("3")
            }
        );
        assert_eq!(env.timestamp, 1700);
        assert_eq!(env.correlation_id.as_deref(), Some("c-9"));
    }

    #[test]
    fn test_reply_echoes_correlation() {
        let request = Envelope::new(
            Inbound::SessionStart {
                target_id: TargetId::from("3"),
                wants_audio: false,
                wants_mic: false,
            },
            10,
        )
        .with_correlation("c-1");

        let reply = Envelope::reply_to(
            &request,
            Reply::Started {
                session_id: SessionId::from("3-10"),
            },
            11,
        );
        let value: serde_json::Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "reply",
                "payload": { "kind": "started", "sessionId": "3-10" },
                "timestamp": 11,
                "correlationId": "c-1"
            })
        );
    }

    #[test]
    fn test_broadcast_omits_correlation() {
        let env = Envelope::new(
            Outbound::StopCapture {
                session_id: SessionId::from("3-10"),
            },
            12,
        );
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert!(value.get("correlationId").is_none());
        assert_eq!(value["payload"]["sessionId"], "3-10");
    }

    #[test]
    fn test_decode_errors_are_classified() {
        assert!(matches!(
            Envelope::<Inbound>::from_json("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::<Inbound>::from_json(r#"{"payload":{}}"#),
            Err(ProtocolError::MissingType)
        ));
        match Envelope::<Inbound>::from_json(r#"{"type":"capture-error","payload":{}}"#) {
            Err(ProtocolError::InvalidPayload { kind, .. }) => assert_eq!(kind, "capture-error"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
