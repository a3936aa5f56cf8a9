//! Buffer draining with at most one flush in flight per session.
//!
//! A flush swaps every channel's buffer out under the session lock, then
//! writes the taken batches to the blob store on a spawned task. The future
//! for that task is stored in the session's flight slot; anyone asking for a
//! flush while it is set awaits the same future instead of starting another.
//!
//! Flushes are triggered three ways, all funnelled through the same slot:
//! - size: [`FlushManager::append`] when a channel reaches the threshold
//! - time: a periodic timer armed while the session is recording
//! - stop: [`FlushManager::final_flush`], exactly once per session
//!
//! A batch whose write fails goes back to the front of its buffer and is
//! retried by the next flush under the same index.

use std::sync::Arc;

use blobs::{BlobStore, BlobStoreExt};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use reelproto::SessionId;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::buffer::{Batch, TelemetryEvent};
use crate::sessions::{SessionError, SessionHandle, SessionRegistry, SessionState};
use crate::settings::RecordingSettings;
use crate::sync::Clock;

/// A flush shared by every caller waiting on it.
pub type FlushFuture = Shared<BoxFuture<'static, FlushReport>>;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Batches written.
    pub written: usize,
    /// Batches that failed and were put back.
    pub failed: usize,
    /// Pending requests dropped by the TTL sweep.
    pub evicted: usize,
}

#[derive(Clone)]
pub struct FlushManager {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    settings: RecordingSettings,
    tasks: TaskTracker,
}

impl FlushManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: RecordingSettings,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            settings,
            tasks,
        }
    }

    /// Buffer a completed event and count it.
    ///
    /// Starts a flush in the background when the event's channel reaches the
    /// threshold and none is already running. Never waits on I/O.
    pub fn append(&self, session_id: &SessionId, event: TelemetryEvent) -> Result<(), SessionError> {
        let handle = self.registry.require(session_id)?;
        let mut state = handle.lock();
        self.append_locked(&handle, &mut state, event)
    }

    /// [`append`](Self::append) for a caller already holding the session lock.
    pub fn append_locked(
        &self,
        handle: &Arc<SessionHandle>,
        state: &mut SessionState,
        event: TelemetryEvent,
    ) -> Result<(), SessionError> {
        Self::ensure_accepting(state)?;

        let channel = event.channel();
        let len = state.buffers.push(event);
        state.session.count(channel);

        if len >= self.settings.flush_threshold && state.flight.is_none() {
            debug!(session.id = %handle.id(), %channel, len, "threshold reached");
            let _ = self.start_flight(handle, state);
        }
        Ok(())
    }

    /// Fails unless the session can still take telemetry.
    pub fn ensure_accepting(state: &SessionState) -> Result<(), SessionError> {
        if state.sealed || state.session.status.is_terminal() {
            return Err(SessionError::NotAccepting {
                session_id: state.session.session_id.clone(),
                status: state.session.status,
            });
        }
        Ok(())
    }

    /// Flush the session, or join the flush already in flight.
    #[tracing::instrument(skip(self), fields(session.id = %session_id))]
    pub async fn flush(&self, session_id: &SessionId) -> Result<FlushReport, SessionError> {
        let handle = self.registry.require(session_id)?;
        let flight = {
            let mut state = handle.lock();
            self.join_or_start(&handle, &mut state)
        };
        Ok(flight.await)
    }

    /// Seal the session and perform its last flush.
    ///
    /// Once sealed, appends are refused and no size- or time-triggered flush
    /// starts. A flush already in flight is awaited first, then one more
    /// drains whatever arrived before sealing. Runs once per session; later
    /// and concurrent callers get the report of that single run.
    #[tracing::instrument(skip(self), fields(session.id = %session_id))]
    pub async fn final_flush(&self, session_id: &SessionId) -> Result<FlushReport, SessionError> {
        let handle = self.registry.require(session_id)?;
        Ok(self.final_flush_handle(&handle).await)
    }

    /// [`final_flush`](Self::final_flush) for a handle the caller already
    /// holds. Works after the session has left the registry.
    pub async fn final_flush_handle(&self, handle: &Arc<SessionHandle>) -> FlushReport {
        *handle
            .final_flush()
            .get_or_init(|| self.seal_and_drain(handle))
            .await
    }

    async fn seal_and_drain(&self, handle: &Arc<SessionHandle>) -> FlushReport {
        let session_id = handle.id();
        let in_flight = {
            let mut state = handle.lock();
            state.sealed = true;
            state.flight.clone()
        };
        if let Some(flight) = in_flight {
            flight.await;
        }

        let flight = {
            let mut state = handle.lock();
            self.join_or_start(handle, &mut state)
        };
        let report = flight.await;

        if report.failed > 0 {
            warn!(
                session.id = %session_id,
                failed = report.failed,
                "final flush left batches unwritten"
            );
        }
        report
    }

    /// Start the periodic flush timer for a session, replacing any earlier one.
    pub fn arm_timer(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let handle = self.registry.require(session_id)?;
        let token = CancellationToken::new();
        if let Some(previous) = handle.lock().timer.replace(token.clone()) {
            previous.cancel();
        }

        let this = self.clone();
        let session_id = session_id.clone();
        let period = self.settings.flush_interval;

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.flush(&session_id).await {
                            debug!(session.id = %session_id, "flush timer stopping: {}", e);
                            break;
                        }
                    }
                }
            }
            debug!(session.id = %session_id, "flush timer disarmed");
        });
        Ok(())
    }

    pub fn disarm_timer(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let handle = self.registry.require(session_id)?;
        Self::disarm(&handle);
        Ok(())
    }

    pub fn disarm(handle: &SessionHandle) {
        if let Some(token) = handle.lock().timer.take() {
            token.cancel();
        }
    }

    /// Cancel every armed timer. Used on shutdown.
    pub fn disarm_all(&self) {
        for handle in self.registry.handles() {
            Self::disarm(&handle);
        }
    }

    fn join_or_start(&self, handle: &Arc<SessionHandle>, state: &mut SessionState) -> FlushFuture {
        match &state.flight {
            Some(flight) => flight.clone(),
            None => self.start_flight(handle, state),
        }
    }

    /// Sweep stale requests and take every non-empty buffer. Must be called
    /// with the session lock held and the flight slot empty.
    fn start_flight(&self, handle: &Arc<SessionHandle>, state: &mut SessionState) -> FlushFuture {
        let evicted = state
            .requests
            .sweep(self.clock.now_ms(), self.settings.pending_ttl);
        let batches = state.buffers.take_batches(handle.id());

        if batches.is_empty() {
            return future::ready(FlushReport {
                evicted,
                ..Default::default()
            })
            .boxed()
            .shared();
        }

        let task = self
            .tasks
            .spawn(self.clone().write_batches(handle.clone(), batches, evicted));
        let session_id = handle.id().clone();
        let flight = async move {
            match task.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(session.id = %session_id, "flush task failed: {}", e);
                    FlushReport::default()
                }
            }
        }
        .boxed()
        .shared();

        state.flight = Some(flight.clone());
        flight
    }

    fn write_batches(
        self,
        handle: Arc<SessionHandle>,
        batches: Vec<Batch>,
        evicted: usize,
    ) -> BoxFuture<'static, FlushReport> {
        async move {
            let store = &self.store;
            let results = future::join_all(batches.into_iter().map(|batch| async move {
                let key = batch.key();
                let result = store.put_json(&key, &batch.events).await;
                (batch, key, result)
            }))
            .await;

            let mut report = FlushReport {
                evicted,
                ..Default::default()
            };
            let mut failed = Vec::new();
            for (batch, key, result) in results {
                match result {
                    Ok(()) => {
                        report.written += 1;
                        debug!(
                            session.id = %batch.session_id,
                            channel = %batch.channel,
                            batch.index = batch.batch_index,
                            events = batch.len(),
                            "wrote batch"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            session.id = %batch.session_id,
                            channel = %batch.channel,
                            batch.index = batch.batch_index,
                            "failed to write {}: {:#}",
                            key,
                            e
                        );
                        failed.push(batch);
                    }
                }
            }

            {
                let mut state = handle.lock();
                for batch in failed {
                    state.buffers.restore(batch);
                }
                state.flight = None;

                // Events that piled up past the threshold while we were writing
                if !state.sealed && state.buffers.any_at(self.settings.flush_threshold) {
                    let _ = self.start_flight(&handle, &mut state);
                }
            }

            report
        }
        .boxed()
    }
}

impl std::fmt::Debug for FlushManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
