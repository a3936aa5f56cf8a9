//! Integration tests for batch flushing.
//!
//! These tests verify:
//! - Concurrent flush requests share one write
//! - Batch indices stay contiguous across size, manual and failed flushes
//! - A failed write is retried under the same index
//! - Stale pending requests are evicted by the flush sweep

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use blobs::{BlobMetadata, BlobStore, BlobStoreExt, MemoryStore};
use pretty_assertions::assert_eq;
use reelproto::{
    Channel, ConsoleEntry, ConsoleEvent, ConsoleLevel, RequestFields, RequestSent, ResourceType,
    ResponseFields, ResponseReceived, SessionId, TargetId,
};
use tabreel::archive;
use tabreel::recorder::Recorder;
use tabreel::settings::RecordingSettings;
use tabreel::sync::ManualClock;
use tokio::sync::Semaphore;

/// A store whose writes block until the test opens the gate, and which can be
/// told to fail its next writes.
struct GatedStore {
    inner: MemoryStore,
    gate: Semaphore,
    gated: AtomicBool,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
}

impl GatedStore {
    fn new(gated: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            gate: Semaphore::new(0),
            gated: AtomicBool::new(gated),
            attempts: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
        }
    }

    fn open(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1024);
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    async fn wait_for_attempts(&self, count: usize) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.attempts() < count {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for GatedStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await?.forget();
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("injected write failure for {}", key);
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn inspect(&self, key: &str) -> Result<Option<BlobMetadata>> {
        self.inner.inspect(key).await
    }
}

fn console(session_id: &SessionId, text: &str) -> ConsoleEntry {
    ConsoleEntry {
        session_id: session_id.clone(),
        level: ConsoleLevel::Log,
        text: text.to_string(),
        source: None,
        url: None,
        line: None,
        timestamp: 1_000,
    }
}

#[tokio::test]
async fn test_concurrent_flushes_share_one_write() -> Result<()> {
    let store = Arc::new(GatedStore::new(true));
    let recorder = Recorder::new(
        store.clone(),
        Arc::new(ManualClock::new(1_000)),
        RecordingSettings::default(),
        64,
    );
    let id = recorder.start_session(&TargetId::from("7"), false, false)?;
    for i in 0..3 {
        recorder.console(console(&id, &format!("line {i}")))?;
    }

    let flush = recorder.flush_manager();
    let first = flush.flush(&id);
    tokio::pin!(first);
    assert!(futures::poll!(&mut first).is_pending());
    store.wait_for_attempts(1).await?;

    // Joins the write already in flight
    let second = flush.flush(&id);
    tokio::pin!(second);
    assert!(futures::poll!(&mut second).is_pending());
    store.open();

    let (first, second) = tokio::join!(first, second);
    let (first, second) = (first?, second?);
    assert_eq!(first, second);
    assert_eq!(first.written, 1);
    assert_eq!(store.attempts(), 1);

    let events: Vec<ConsoleEvent> = archive::load_channel(&*store, &id, Channel::Console).await?;
    assert_eq!(events.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_events_during_flight_land_in_next_batch() -> Result<()> {
    let store = Arc::new(GatedStore::new(true));
    let recorder = Recorder::new(
        store.clone(),
        Arc::new(ManualClock::new(1_000)),
        RecordingSettings::default(),
        64,
    );
    let id = recorder.start_session(&TargetId::from("7"), false, false)?;
    recorder.console(console(&id, "before"))?;

    let flush = recorder.flush_manager().clone();
    let pending = tokio::spawn({
        let id = id.clone();
        async move { flush.flush(&id).await }
    });
    store.wait_for_attempts(1).await?;

    recorder.console(console(&id, "during"))?;
    store.open();
    pending.await??;

    recorder.flush_manager().flush(&id).await?;

    let first: Vec<ConsoleEvent> = store.get_json(&format!("{id}:console:batch:0")).await?.unwrap_or_default();
    let second: Vec<ConsoleEvent> = store.get_json(&format!("{id}:console:batch:1")).await?.unwrap_or_default();
    assert_eq!(first.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(), vec!["before"]);
    assert_eq!(second.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(), vec!["during"]);
    Ok(())
}

#[tokio::test]
async fn test_threshold_flush_keeps_indices_contiguous() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let recorder = Recorder::new(
        store.clone(),
        Arc::new(ManualClock::new(1_000)),
        RecordingSettings::default(),
        64,
    );
    let id = recorder.start_session(&TargetId::from("8"), false, false)?;

    for i in 0..50 {
        recorder.console(console(&id, &format!("line {i}")))?;
    }
    // The fiftieth event started a background flush
    recorder.settle().await;
    assert!(store.exists(&format!("{id}:console:batch:0")).await?);

    recorder.console(console(&id, "line 50"))?;
    recorder.flush_manager().flush(&id).await?;

    let events: Vec<ConsoleEvent> = archive::load_channel(&*store, &id, Channel::Console).await?;
    assert_eq!(events.len(), 51);
    assert_eq!(events[50].text, "line 50");

    let summary = recorder.registry().summary(&id)?;
    assert_eq!(summary.batches.get(&Channel::Console), Some(&2));
    assert_eq!(summary.session.counts.console_count, 51);
    Ok(())
}

#[tokio::test]
async fn test_failed_batch_is_retried_under_same_index() -> Result<()> {
    let store = Arc::new(GatedStore::new(false));
    let recorder = Recorder::new(
        store.clone(),
        Arc::new(ManualClock::new(1_000)),
        RecordingSettings::default(),
        64,
    );
    let id = recorder.start_session(&TargetId::from("9"), false, false)?;
    recorder.console(console(&id, "a"))?;
    recorder.console(console(&id, "b"))?;

    store.fail_next(1);
    let report = recorder.flush_manager().flush(&id).await?;
    assert_eq!(report.written, 0);
    assert_eq!(report.failed, 1);
    assert!(!store.exists(&format!("{id}:console:batch:0")).await?);

    recorder.console(console(&id, "c"))?;
    let report = recorder.flush_manager().flush(&id).await?;
    assert_eq!(report.written, 1);

    let batch: Vec<ConsoleEvent> = store
        .get_json(&format!("{id}:console:batch:0"))
        .await?
        .unwrap_or_default();
    assert_eq!(
        batch.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    assert!(!store.exists(&format!("{id}:console:batch:1")).await?);
    Ok(())
}

#[tokio::test]
async fn test_stale_requests_evicted_on_flush() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(1_000_000));
    let recorder = Recorder::new(store.clone(), clock.clone(), RecordingSettings::default(), 64);
    let id = recorder.start_session(&TargetId::from("3"), false, false)?;

    recorder.network_request(RequestSent {
        session_id: id.clone(),
        request_id: "slow".into(),
        fields: RequestFields {
            url: Some("https://example.test/slow".into()),
            method: Some("GET".into()),
            resource_type: ResourceType::Fetch,
            timestamp: 10.0,
            wall_time: 1_000.0,
            ..Default::default()
        },
    })?;

    // Exactly at the TTL the request is still kept
    clock.advance(120_000);
    let report = recorder.flush_manager().flush(&id).await?;
    assert_eq!(report.evicted, 0);

    clock.advance(1);
    let report = recorder.flush_manager().flush(&id).await?;
    assert_eq!(report.evicted, 1);

    recorder.network_response(ResponseReceived {
        session_id: id.clone(),
        request_id: "slow".into(),
        fields: ResponseFields {
            status: 200,
            timestamp: 131.0,
            ..Default::default()
        },
    })?;

    let summary = recorder.registry().summary(&id)?;
    assert_eq!(summary.correlation.evicted, 1);
    assert_eq!(summary.correlation.unknown_responses, 1);
    assert_eq!(summary.session.counts.network_count, 0);
    Ok(())
}
