//! Read a finished session back out of the blob store.
//!
//! A channel's full event list is the concatenation of its batches in index
//! order. Indices are contiguous from 0, so reading stops at the first
//! missing one.

use anyhow::{Context, Result};
use blobs::{BlobStore, BlobStoreExt};
use reelproto::{Channel, ConsoleEvent, DomEvent, NetworkEvent, PageState, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keys::{batch_key, metadata_key, state_key};
use crate::sessions::SessionSummary;

/// Everything recorded for one session, ready for a report renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub summary: SessionSummary,
    pub network: Vec<NetworkEvent>,
    pub console: Vec<ConsoleEvent>,
    pub dom: Vec<DomEvent>,
    pub state: Option<PageState>,
}

/// Load every batch of `channel` for a session, in index order.
pub async fn load_channel<T>(
    store: &dyn BlobStore,
    session_id: &SessionId,
    channel: Channel,
) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send,
{
    let mut events = Vec::new();
    for index in 0u64.. {
        let key = batch_key(session_id, channel, index);
        let Some(batch) = store
            .get_json::<Vec<T>>(&key)
            .await
            .with_context(|| format!("failed to read batch {}", key))?
        else {
            debug!(session.id = %session_id, %channel, batches = index, "loaded channel");
            break;
        };
        events.extend(batch);
    }
    Ok(events)
}

pub async fn load_summary(
    store: &dyn BlobStore,
    session_id: &SessionId,
) -> Result<Option<SessionSummary>> {
    store
        .get_json(&metadata_key(session_id))
        .await
        .with_context(|| format!("failed to read summary for {}", session_id))
}

/// Load the summary, all three channels and the page state of a session.
pub async fn export(store: &dyn BlobStore, session_id: &SessionId) -> Result<SessionExport> {
    let summary = load_summary(store, session_id)
        .await?
        .with_context(|| format!("session not found: {}", session_id))?;

    Ok(SessionExport {
        summary,
        network: load_channel(store, session_id, Channel::Network).await?,
        console: load_channel(store, session_id, Channel::Console).await?,
        dom: load_channel(store, session_id, Channel::Dom).await?,
        state: store
            .get_json(&state_key(session_id))
            .await
            .with_context(|| format!("failed to read page state for {}", session_id))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobs::MemoryStore;
    use reelproto::ConsoleLevel;

    fn console(text: &str) -> ConsoleEvent {
        ConsoleEvent {
            level: ConsoleLevel::Info,
            text: text.into(),
            source: None,
            url: None,
            line: None,
            timestamp: 0,
            video_offset: 0,
        }
    }

    #[tokio::test]
    async fn test_load_channel_concatenates_in_order() -> Result<()> {
        let store = MemoryStore::new();
        let sid = SessionId::from("s-1");
        store
            .put_json(&batch_key(&sid, Channel::Console, 0), &vec![console("a"), console("b")])
            .await?;
        store
            .put_json(&batch_key(&sid, Channel::Console, 1), &vec![console("c")])
            .await?;
        // Past a gap, never read
        store
            .put_json(&batch_key(&sid, Channel::Console, 3), &vec![console("z")])
            .await?;

        let events: Vec<ConsoleEvent> = load_channel(&store, &sid, Channel::Console).await?;
        let texts: Vec<_> = events.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_export_requires_summary() {
        let store = MemoryStore::new();
        let err = export(&store, &SessionId::from("missing")).await.unwrap_err();
        assert!(err.to_string().contains("session not found"));
    }
}
