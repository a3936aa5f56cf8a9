//! Session lifecycle and telemetry handling.
//!
//! [`Recorder`] ties the registry, the correlator tables and the flush
//! manager together. Each inbound message maps to one method here; the
//! router only decodes and dispatches.

use std::sync::Arc;

use blobs::{BlobStore, BlobStoreExt};
use futures::future::join_all;
use reelproto::{
    CapabilityState, CaptureStage, ConsoleEntry, ConsoleEvent, DomEvent, DomInteraction,
    LoadFailed, Outbound, PageState, RequestSent, ResponseReceived, SessionId, SessionStatus,
    StatusReport, StoredBlob, TargetId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::buffer::TelemetryEvent;
use crate::flush::FlushManager;
use crate::keys::{blob_metadata_key, last_session_key, metadata_key, state_key, BlobKind};
use crate::publisher::Publisher;
use crate::sessions::{
    Capabilities, Session, SessionError, SessionHandle, SessionRegistry, SessionSummary,
    StatusFilter,
};
use crate::settings::RecordingSettings;
use crate::sync::{video_offset_ms, Clock};

/// Post-hoc fields for a chunk or screenshot the capture side stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    pub storage_key: String,
    pub index: u64,
    pub timestamp: i64,
    pub video_offset: i64,
}

const SHUTDOWN_REASON: &str = "recorder shut down";

#[derive(Clone)]
pub struct Recorder {
    registry: Arc<SessionRegistry>,
    flush: FlushManager,
    store: Arc<dyn BlobStore>,
    publisher: Publisher,
    settings: RecordingSettings,
    tasks: TaskTracker,
}

impl Recorder {
    pub fn new(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: RecordingSettings,
        broadcast_capacity: usize,
    ) -> Self {
        let publisher = Publisher::new(broadcast_capacity, clock.clone());
        let registry = Arc::new(SessionRegistry::new(clock.clone(), publisher.clone()));
        let tasks = TaskTracker::new();
        let flush = FlushManager::new(
            registry.clone(),
            store.clone(),
            clock,
            settings,
            tasks.clone(),
        );

        Self {
            registry,
            flush,
            store,
            publisher,
            settings,
            tasks,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn flush_manager(&self) -> &FlushManager {
        &self.flush
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<reelproto::Envelope<Outbound>> {
        self.publisher.subscribe()
    }

    /// Wait for every background task (stop sequences, flush writes) to end.
    pub async fn settle(&self) {
        self.flush.disarm_all();
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Drain every live session before the process exits, then settle.
    ///
    /// A stopping session is released from its watchdog and completes
    /// normally. Idle and recording sessions end in a recoverable error with
    /// their buffers flushed and their summary and last-session record
    /// written.
    pub async fn shutdown(&self) {
        let mut drains = Vec::new();
        for handle in self.registry.handles() {
            match handle.status() {
                SessionStatus::Stopping => handle.mark_finished(),
                SessionStatus::Idle | SessionStatus::Recording => {
                    if let Err(e) = self.registry.record_error(handle.id(), SHUTDOWN_REASON, true) {
                        debug!(session.id = %handle.id(), "shutdown: {}", e);
                        continue;
                    }
                    handle.mark_finished();
                    drains.push(async move {
                        self.teardown(&handle).await;
                        self.persist_summary(&handle).await;
                    });
                }
                _ => {}
            }
        }

        let drained = drains.len();
        join_all(drains).await;
        self.settle().await;
        info!(drained, "recorder shut down");
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a session and ask the capture side to acquire streams.
    pub fn start_session(
        &self,
        target_id: &TargetId,
        wants_audio: bool,
        wants_mic: bool,
    ) -> Result<SessionId, SessionError> {
        let session = self
            .registry
            .create(target_id, Capabilities::requested(wants_audio, wants_mic))?;

        self.publisher.publish(Outbound::StartCapture {
            session_id: session.session_id.clone(),
            target_id: target_id.clone(),
            wants_audio,
            wants_mic,
        });
        Ok(session.session_id)
    }

    /// The capture side is live: start recording.
    pub fn capture_ready(
        &self,
        session_id: &SessionId,
        capability_state: CapabilityState,
        mic_failed: bool,
    ) -> Result<Session, SessionError> {
        let session =
            self.registry
                .transition_with(session_id, SessionStatus::Recording, |session| {
                    let caps = &mut session.capabilities;
                    caps.capture_surface_active = true;
                    caps.debugger_attached = capability_state.debugger;
                    caps.mic_failed = caps.wants_mic && mic_failed;
                })?;
        if session.capabilities.mic_failed {
            info!(session.id = %session_id, "recording without microphone");
        }

        self.flush.arm_timer(session_id)?;
        self.publisher.publish(Outbound::StartPageRecording {
            session_id: session_id.clone(),
            start_time: session.start_time,
        });
        Ok(session)
    }

    /// Stop the target's active session.
    ///
    /// A recording session moves to `stopping` and finishes in the
    /// background. A session whose capture never became ready fails
    /// immediately. Stopping a session that is already stopping is a no-op.
    pub fn stop_session(&self, target_id: &TargetId) -> Result<Session, SessionError> {
        let session = self
            .registry
            .find_by_target(target_id, StatusFilter::Active)
            .ok_or_else(|| SessionError::NoActiveSession(target_id.clone()))?;
        let session_id = session.session_id.clone();

        match session.status {
            SessionStatus::Idle => {
                let failed = self.registry.record_error(
                    &session_id,
                    "stopped before capture became ready",
                    false,
                )?;
                self.publisher.publish(Outbound::StopCapture {
                    session_id: session_id.clone(),
                });
                self.spawn_teardown(session_id);
                Ok(failed)
            }
            SessionStatus::Recording => {
                let stopping = match self.registry.transition(&session_id, SessionStatus::Stopping) {
                    Ok(s) => s,
                    // Lost a race with another stop
                    Err(SessionError::IllegalTransition { .. }) => {
                        return self
                            .registry
                            .get(&session_id)
                            .ok_or(SessionError::NotFound(session_id));
                    }
                    Err(e) => return Err(e),
                };
                self.flush.disarm_timer(&session_id)?;

                for message in [
                    Outbound::StopPageRecording {
                        session_id: session_id.clone(),
                    },
                    Outbound::SerializePage {
                        session_id: session_id.clone(),
                    },
                    Outbound::StopCapture {
                        session_id: session_id.clone(),
                    },
                ] {
                    self.publisher.publish(message);
                }

                let this = self.clone();
                self.tasks
                    .spawn(async move { this.run_stop_sequence(session_id).await });
                Ok(stopping)
            }
            _ => Ok(session),
        }
    }

    #[tracing::instrument(skip(self), fields(session.id = %session_id))]
    async fn run_stop_sequence(&self, session_id: SessionId) {
        let Some(handle) = self.registry.handle(&session_id) else {
            return;
        };

        if tokio::time::timeout(self.settings.stop_timeout, handle.wait_finished())
            .await
            .is_err()
        {
            warn!(
                session.id = %session_id,
                timeout_ms = self.settings.stop_timeout.as_millis() as u64,
                "capture did not finish in time, forcing teardown"
            );
        }

        self.teardown(&handle).await;

        match self.registry.transition(&session_id, SessionStatus::Completed) {
            Ok(session) => info!(
                session.id = %session_id,
                network = session.counts.network_count,
                console = session.counts.console_count,
                dom = session.counts.dom_count,
                chunks = session.counts.chunk_count,
                "session completed"
            ),
            // A capture error during stopping already ended it
            Err(e) => debug!(session.id = %session_id, "not completing: {}", e),
        }

        self.persist_summary(&handle).await;
    }

    /// The capture side failed at `stage`.
    pub fn capture_error(
        &self,
        session_id: &SessionId,
        stage: CaptureStage,
        error: &str,
    ) -> Result<Session, SessionError> {
        let session = self
            .registry
            .record_error(session_id, error, stage.is_recoverable())?;

        for message in [
            Outbound::StopPageRecording {
                session_id: session_id.clone(),
            },
            Outbound::StopCapture {
                session_id: session_id.clone(),
            },
        ] {
            self.publisher.publish(message);
        }

        if let Some(handle) = self.registry.handle(session_id) {
            handle.mark_finished();
        }
        self.spawn_teardown(session_id.clone());
        Ok(session)
    }

    /// The capture side delivered its last chunk.
    pub fn capture_finished(&self, session_id: &SessionId, final_count: u64) -> Result<(), SessionError> {
        let handle = self.registry.require(session_id)?;
        let report = {
            let mut state = handle.lock();
            let counts = &mut state.session.counts;
            counts.chunk_count = counts.chunk_count.max(final_count);
            state.session.status_report()
        };
        handle.mark_finished();

        debug!(session.id = %session_id, final_count, "capture finished");
        self.publisher.status(report);
        Ok(())
    }

    /// Network capture is gone; the session carries on without it.
    pub fn debugger_detached(
        &self,
        session_id: &SessionId,
        reason: Option<&str>,
    ) -> Result<(), SessionError> {
        let report = self.registry.with_state(session_id, |state| {
            state.session.capabilities.debugger_attached = false;
            state.session.status_report()
        })?;

        info!(
            session.id = %session_id,
            reason = reason.unwrap_or("unknown"),
            "debugger detached"
        );
        self.publisher.status(report);
        Ok(())
    }

    /// Tear the session down in the background. The handle is taken now,
    /// so a new session for the same target cannot strand the final flush.
    fn spawn_teardown(&self, session_id: SessionId) {
        let Some(handle) = self.registry.handle(&session_id) else {
            debug!(session.id = %session_id, "teardown: session already gone");
            return;
        };
        let this = self.clone();
        self.tasks.spawn(async move {
            this.teardown(&handle).await;
            this.persist_summary(&handle).await;
        });
    }

    /// Stop the timer, drain the buffers once, release the request table.
    async fn teardown(&self, handle: &Arc<SessionHandle>) {
        FlushManager::disarm(handle);
        let report = self.flush.final_flush_handle(handle).await;
        debug!(
            session.id = %handle.id(),
            written = report.written,
            failed = report.failed,
            evicted = report.evicted,
            "final flush done"
        );
        handle.lock().requests.release();
    }

    /// Write the session summary, plus the target's durable last-session
    /// record once the session is terminal. Failures are logged.
    async fn persist_summary(&self, handle: &SessionHandle) {
        let session_id = handle.id();
        let summary = handle.lock().summary();

        if let Err(e) = self.store.put_json(&metadata_key(session_id), &summary).await {
            warn!(session.id = %session_id, "failed to write summary: {:#}", e);
        }

        if summary.session.status.is_terminal() {
            let key = last_session_key(&summary.session.target_id);
            if let Err(e) = self.store.put_json(&key, &summary).await {
                warn!(session.id = %session_id, "failed to write last-session record: {:#}", e);
            }
        }
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    pub fn network_request(&self, sent: RequestSent) -> Result<(), SessionError> {
        let handle = self.registry.require(&sent.session_id)?;
        let mut state = handle.lock();
        FlushManager::ensure_accepting(&state)?;
        state.requests.on_request_sent(&sent.request_id, sent.fields);
        Ok(())
    }

    pub fn network_response(&self, received: ResponseReceived) -> Result<(), SessionError> {
        let handle = self.registry.require(&received.session_id)?;
        let mut state = handle.lock();
        FlushManager::ensure_accepting(&state)?;

        let completed = state.requests.on_response_received(
            &received.request_id,
            received.fields,
            handle.start_time(),
        );
        if let Some(event) = completed {
            self.flush.append_locked(&handle, &mut state, event.into())?;
        }
        Ok(())
    }

    pub fn network_failed(&self, failed: LoadFailed) -> Result<(), SessionError> {
        let handle = self.registry.require(&failed.session_id)?;
        let mut state = handle.lock();
        FlushManager::ensure_accepting(&state)?;

        let completed =
            state
                .requests
                .on_load_failed(&failed.request_id, failed.fields, handle.start_time());
        if let Some(event) = completed {
            self.flush.append_locked(&handle, &mut state, event.into())?;
        }
        Ok(())
    }

    pub fn console(&self, entry: ConsoleEntry) -> Result<(), SessionError> {
        let handle = self.registry.require(&entry.session_id)?;
        let event = ConsoleEvent {
            level: entry.level,
            text: entry.text,
            source: entry.source,
            url: entry.url,
            line: entry.line,
            timestamp: entry.timestamp,
            video_offset: video_offset_ms(entry.timestamp, handle.start_time()),
        };
        let mut state = handle.lock();
        self.flush
            .append_locked(&handle, &mut state, TelemetryEvent::Console(event))
    }

    pub fn dom(&self, interaction: DomInteraction) -> Result<(), SessionError> {
        let handle = self.registry.require(&interaction.session_id)?;
        let event = DomEvent {
            kind: interaction.kind,
            selector: interaction.selector,
            text: interaction.text,
            value: interaction.value,
            url: interaction.url,
            x: interaction.x,
            y: interaction.y,
            timestamp: interaction.timestamp,
            video_offset: video_offset_ms(interaction.timestamp, handle.start_time()),
        };
        let mut state = handle.lock();
        self.flush
            .append_locked(&handle, &mut state, TelemetryEvent::Dom(event))
    }

    /// Count a chunk or screenshot and write its metadata sibling in the
    /// background. Write failures are logged.
    pub fn blob_stored(&self, kind: BlobKind, blob: StoredBlob) -> Result<(), SessionError> {
        let handle = self.registry.require(&blob.session_id)?;
        {
            let mut state = handle.lock();
            let status = state.session.status;
            if status.is_terminal() {
                return Err(SessionError::NotAccepting {
                    session_id: blob.session_id.clone(),
                    status,
                });
            }
            let counts = &mut state.session.counts;
            match kind {
                BlobKind::Chunk => counts.chunk_count += 1,
                BlobKind::Screenshot => counts.screenshot_count += 1,
            }
        }

        let key = blob_metadata_key(&blob.session_id, kind, blob.index);
        let record = BlobRecord {
            video_offset: video_offset_ms(blob.timestamp, handle.start_time()),
            storage_key: blob.storage_key,
            index: blob.index,
            timestamp: blob.timestamp,
        };
        let store = self.store.clone();
        self.tasks.spawn(async move {
            if let Err(e) = store.put_json(&key, &record).await {
                warn!(session.id = %handle.id(), "failed to write {}: {:#}", key, e);
            }
        });
        Ok(())
    }

    /// Replace the session's page state snapshot.
    ///
    /// Each session has at most one writer. Snapshots that arrive while it
    /// is busy replace each other, so the newest one is written last.
    pub fn state_snapshot(&self, snapshot: PageState) -> Result<(), SessionError> {
        let handle = self.registry.require(&snapshot.session_id)?;
        let start_writer = {
            let mut state = handle.lock();
            state.pending_page_state = Some(snapshot);
            !std::mem::replace(&mut state.page_state_writer, true)
        };

        if start_writer {
            let this = self.clone();
            self.tasks
                .spawn(async move { this.write_page_state(handle).await });
        }
        Ok(())
    }

    async fn write_page_state(&self, handle: Arc<SessionHandle>) {
        let key = state_key(handle.id());
        loop {
            let next = {
                let mut state = handle.lock();
                let next = state.pending_page_state.take();
                if next.is_none() {
                    state.page_state_writer = false;
                }
                next
            };
            let Some(snapshot) = next else {
                return;
            };

            match self.store.put_json(&key, &snapshot).await {
                Ok(()) => debug!(
                    session.id = %handle.id(),
                    cookies = snapshot.cookies.len(),
                    "stored page state"
                ),
                Err(e) => warn!(session.id = %handle.id(), "failed to write {}: {:#}", key, e),
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The target's live or most recent session, then its durable
    /// last-session record, then an idle placeholder.
    pub async fn status(&self, target_id: &TargetId) -> StatusReport {
        match self.live_status(target_id) {
            Some(report) => report,
            None => self.stored_status(target_id).await,
        }
    }

    /// Status of a session still held in the registry, without touching
    /// the store.
    pub fn live_status(&self, target_id: &TargetId) -> Option<StatusReport> {
        self.registry
            .find_by_target(target_id, StatusFilter::Any)
            .map(|session| session.status_report())
    }

    /// Status from the target's durable last-session record.
    pub async fn stored_status(&self, target_id: &TargetId) -> StatusReport {
        match self
            .store
            .get_json::<SessionSummary>(&last_session_key(target_id))
            .await
        {
            Ok(Some(summary)) => summary.session.status_report(),
            Ok(None) => StatusReport::idle(target_id.clone()),
            Err(e) => {
                warn!(target.id = %target_id, "unreadable last-session record: {:#}", e);
                StatusReport::idle(target_id.clone())
            }
        }
    }

    /// Run `future` as a tracked background task, so [`settle`](Self::settle)
    /// waits for it.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("settings", &self.settings)
            .field("sessions", &self.registry.list().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ManualClock;
    use blobs::MemoryStore;
    use reelproto::{ConsoleLevel, Reply};

    fn recorder() -> (Recorder, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1000));
        let recorder = Recorder::new(store.clone(), clock, RecordingSettings::default(), 64);
        (recorder, store)
    }

    fn entry(session_id: &SessionId, timestamp: i64) -> ConsoleEntry {
        ConsoleEntry {
            session_id: session_id.clone(),
            level: ConsoleLevel::Warn,
            text: "careful".into(),
            source: None,
            url: None,
            line: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_start_emits_start_capture() {
        let (recorder, _) = recorder();
        let mut rx = recorder.subscribe();
        let id = recorder
            .start_session(&TargetId::from("5"), true, false)
            .unwrap();

        let mut saw_start = false;
        while let Ok(envelope) = rx.try_recv() {
            if let Outbound::StartCapture { session_id, wants_audio, .. } = envelope.message {
                assert_eq!(session_id, id);
                assert!(wants_audio);
                saw_start = true;
            }
        }
        assert!(saw_start);
    }

    #[tokio::test]
    async fn test_capture_ready_records_mic_failure() {
        let (recorder, _) = recorder();
        let id = recorder
            .start_session(&TargetId::from("5"), true, true)
            .unwrap();
        let session = recorder
            .capture_ready(
                &id,
                CapabilityState {
                    capture_surface: true,
                    tab_audio: true,
                    microphone: false,
                    debugger: true,
                },
                true,
            )
            .unwrap();

        assert_eq!(session.status, SessionStatus::Recording);
        assert!(session.capabilities.mic_failed);
        assert!(session.capabilities.debugger_attached);
        assert_eq!(session.status_report().mic_failed, Some(true));
        recorder.settle().await;
    }

    #[tokio::test]
    async fn test_late_capture_ready_leaves_capabilities_alone() {
        let (recorder, _) = recorder();
        let id = recorder
            .start_session(&TargetId::from("5"), false, false)
            .unwrap();
        recorder
            .capture_error(&id, CaptureStage::Initialization, "no surface")
            .unwrap();

        let late = recorder.capture_ready(
            &id,
            CapabilityState {
                capture_surface: true,
                tab_audio: false,
                microphone: false,
                debugger: true,
            },
            false,
        );
        assert!(matches!(late, Err(SessionError::IllegalTransition { .. })));

        let session = recorder.registry().get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert!(!session.capabilities.capture_surface_active);
        assert!(!session.capabilities.debugger_attached);
        recorder.settle().await;
    }

    #[tokio::test]
    async fn test_console_offset_from_t0() {
        let (recorder, _) = recorder();
        let id = recorder
            .start_session(&TargetId::from("5"), false, false)
            .unwrap();
        recorder.console(entry(&id, 940)).unwrap();

        let report = recorder.flush_manager().flush(&id).await.unwrap();
        assert_eq!(report.written, 1);
        let events: Vec<ConsoleEvent> = recorder
            .store()
            .get_json("5-1000:console:batch:0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events[0].video_offset, -60);
    }

    #[tokio::test]
    async fn test_blob_stored_writes_metadata_sibling() {
        let (recorder, store) = recorder();
        let id = recorder
            .start_session(&TargetId::from("5"), false, false)
            .unwrap();

        recorder
            .blob_stored(
                BlobKind::Screenshot,
                StoredBlob {
                    session_id: id.clone(),
                    storage_key: "5-1000:screenshot:0".into(),
                    index: 0,
                    timestamp: 1750,
                },
            )
            .unwrap();
        recorder.settle().await;

        let record: BlobRecord = store
            .get_json("5-1000:screenshot:0:metadata")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.video_offset, 750);
        assert_eq!(
            recorder.registry().get(&id).unwrap().counts.screenshot_count,
            1
        );
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_non_recoverable() {
        let (recorder, store) = recorder();
        let target = TargetId::from("5");
        let id = recorder.start_session(&target, false, false).unwrap();

        let session = recorder.stop_session(&target).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error.as_ref().map(|e| e.recoverable), Some(false));

        recorder.settle().await;
        assert!(store.exists(&metadata_key(&id)).await.unwrap());
        assert!(store.exists(&last_session_key(&target)).await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let (recorder, _) = recorder();
        let err = recorder.stop_session(&TargetId::from("nobody")).unwrap_err();
        assert!(matches!(err, SessionError::NoActiveSession(_)));
        // Replies carry the message
        assert!(Reply::error(err.to_string()).is_error());
    }

    #[tokio::test]
    async fn test_status_falls_back_to_idle() {
        let (recorder, _) = recorder();
        let report = recorder.status(&TargetId::from("never")).await;
        assert_eq!(report.status, SessionStatus::Idle);
        assert!(report.session_id.is_none());
    }

    #[tokio::test]
    async fn test_state_snapshot_replaced_wholesale() {
        let (recorder, store) = recorder();
        let id = recorder
            .start_session(&TargetId::from("5"), false, false)
            .unwrap();

        let mut first = PageState {
            session_id: id.clone(),
            local_storage: [("a".to_string(), "1".to_string())].into_iter().collect(),
            session_storage: Default::default(),
            cookies: vec![],
        };
        recorder.state_snapshot(first.clone()).unwrap();

        first.local_storage.clear();
        first.local_storage.insert("b".into(), "2".into());
        recorder.state_snapshot(first).unwrap();
        recorder.settle().await;

        let stored: PageState = store.get_json(&state_key(&id)).await.unwrap().unwrap();
        assert_eq!(stored.local_storage.len(), 1);
        assert_eq!(stored.local_storage["b"], "2");
    }
}
