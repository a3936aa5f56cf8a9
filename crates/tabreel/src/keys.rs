//! Blob store key schema.
//!
//! ```text
//! {sessionId}:{channel}:batch:{index}    ordered array of channel events
//! {sessionId}:metadata                   session summary
//! {sessionId}:state                      page storage + cookies snapshot
//! {sessionId}:chunk:{index}              media chunk (written by capture)
//! {sessionId}:chunk:{index}:metadata     post-hoc chunk fields
//! {sessionId}:screenshot:{index}         screenshot (written by capture)
//! {sessionId}:screenshot:{index}:metadata
//! target:{targetId}:last-session         last terminal session summary
//! ```

use reelproto::{Channel, SessionId, TargetId};

pub fn batch_key(session_id: &SessionId, channel: Channel, index: u64) -> String {
    format!("{}:{}:batch:{}", session_id, channel, index)
}

pub fn metadata_key(session_id: &SessionId) -> String {
    format!("{}:metadata", session_id)
}

pub fn state_key(session_id: &SessionId) -> String {
    format!("{}:state", session_id)
}

/// Kind of binary payload the capture side writes directly to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Chunk,
    Screenshot,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::Chunk => "chunk",
            BlobKind::Screenshot => "screenshot",
        }
    }
}

pub fn blob_key(session_id: &SessionId, kind: BlobKind, index: u64) -> String {
    format!("{}:{}:{}", session_id, kind.as_str(), index)
}

pub fn blob_metadata_key(session_id: &SessionId, kind: BlobKind, index: u64) -> String {
    format!("{}:metadata", blob_key(session_id, kind, index))
}

pub fn last_session_key(target_id: &TargetId) -> String {
    format!("target:{}:last-session", target_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        let session = SessionId::from("7-1000");
        assert_eq!(batch_key(&session, Channel::Network, 0), "7-1000:network:batch:0");
        assert_eq!(batch_key(&session, Channel::Dom, 12), "7-1000:dom:batch:12");
        assert_eq!(metadata_key(&session), "7-1000:metadata");
        assert_eq!(state_key(&session), "7-1000:state");
        assert_eq!(blob_key(&session, BlobKind::Chunk, 3), "7-1000:chunk:3");
        assert_eq!(
            blob_metadata_key(&session, BlobKind::Screenshot, 3),
            "7-1000:screenshot:3:metadata"
        );
        assert_eq!(last_session_key(&TargetId::from("7")), "target:7:last-session");
    }
}
