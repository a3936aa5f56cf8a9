//! Session registry - the single owner of every session's state.
//!
//! The registry keeps a primary map from session id to a [`SessionHandle`]
//! and a secondary index from target id to that target's most recent
//! session. Both are updated together under one index lock.
//!
//! Each handle carries one coarse mutex guarding everything that belongs to
//! the session: status and counters, the pending-request table, the telemetry
//! buffers and the flush slot. The mutex is only ever held for synchronous
//! work, never across an await.
//!
//! Lock order is index then session. Nothing takes the index lock while
//! holding a session lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use reelproto::{PageState, SessionFailure, SessionId, SessionStatus, TargetId};
use thiserror::Error;
use tokio::sync::{watch, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{Capabilities, Session, SessionSummary, StatusFilter};
use crate::buffer::TelemetryBuffers;
use crate::correlator::RequestTable;
use crate::flush::{FlushFuture, FlushReport};
use crate::publisher::Publisher;
use crate::sync::Clock;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("target {target_id} already has an active session: {session_id}")]
    ActiveSessionExists {
        target_id: TargetId,
        session_id: SessionId,
    },

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("no active session for target: {0}")]
    NoActiveSession(TargetId),

    #[error("illegal transition for session {session_id}: {from} -> {to}")]
    IllegalTransition {
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("session {session_id} is not accepting telemetry ({status})")]
    NotAccepting {
        session_id: SessionId,
        status: SessionStatus,
    },
}

/// Everything guarded by a session's mutex.
pub struct SessionState {
    pub session: Session,
    pub requests: RequestTable,
    pub buffers: TelemetryBuffers,
    /// The flush currently in flight, shared by every caller that asks for one.
    pub flight: Option<FlushFuture>,
    /// Cancels the periodic flush timer while recording.
    pub timer: Option<CancellationToken>,
    /// Set once the final flush has begun. No further telemetry is accepted.
    pub sealed: bool,
    /// Latest page state not yet handed to the store.
    pub pending_page_state: Option<PageState>,
    /// A page state writer is running for this session.
    pub page_state_writer: bool,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("session", &self.session)
            .field("pending", &self.requests.len())
            .field("buffered", &self.buffers.total_len())
            .field("flushing", &self.flight.is_some())
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

impl SessionState {
    fn new(session: Session) -> Self {
        Self {
            session,
            requests: RequestTable::new(),
            buffers: TelemetryBuffers::new(),
            flight: None,
            timer: None,
            sealed: false,
            pending_page_state: None,
            page_state_writer: false,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session: self.session.clone(),
            correlation: self.requests.stats(),
            batches: self.buffers.batch_counts(),
        }
    }
}

/// Shared handle to one session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    target_id: TargetId,
    start_time: i64,
    state: Mutex<SessionState>,
    finished: watch::Sender<bool>,
    final_report: OnceCell<FlushReport>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// T0 of the session.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn snapshot(&self) -> Session {
        self.state.lock().session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().session.status
    }

    /// Result of the session's final flush, set exactly once.
    pub fn final_flush(&self) -> &OnceCell<FlushReport> {
        &self.final_report
    }

    /// Signal that the capture side delivered its final data.
    pub fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    /// Wait until [`mark_finished`](Self::mark_finished) has been called.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives as long as the handle, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[derive(Debug, Default)]
struct Index {
    sessions: HashMap<SessionId, Arc<SessionHandle>>,
    by_target: HashMap<TargetId, SessionId>,
}

/// Owner of every live and recently finished session.
#[derive(Debug)]
pub struct SessionRegistry {
    index: RwLock<Index>,
    clock: Arc<dyn Clock>,
    publisher: Publisher,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>, publisher: Publisher) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            clock,
            publisher,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Create a session for `target_id` in `idle`, with T0 read from the clock.
    ///
    /// Fails if the target already has a non-terminal session. A terminal
    /// predecessor is dropped from the registry, and T0 is bumped past the
    /// predecessor's so the derived session id is always new.
    pub fn create(
        &self,
        target_id: &TargetId,
        capabilities: Capabilities,
    ) -> Result<Session, SessionError> {
        let session = {
            let mut index = self.index.write();

            let mut floor = i64::MIN;
            if let Some(existing) = index.by_target.get(target_id).cloned() {
                if let Some(handle) = index.sessions.get(&existing) {
                    if handle.status().is_active() {
                        return Err(SessionError::ActiveSessionExists {
                            target_id: target_id.clone(),
                            session_id: existing,
                        });
                    }
                    floor = handle.start_time().saturating_add(1);
                }
                index.sessions.remove(&existing);
                debug!(session.id = %existing, "pruned finished session");
            }

            // A restart within the predecessor's millisecond still needs a
            // fresh id, so T0 never repeats for a target.
            let start_time = self.clock.now_ms().max(floor);
            let session_id = SessionId::derive(target_id, start_time);
            let session = Session::new(
                session_id.clone(),
                target_id.clone(),
                start_time,
                capabilities,
            );
            let (finished, _) = watch::channel(false);
            let handle = Arc::new(SessionHandle {
                id: session_id.clone(),
                target_id: target_id.clone(),
                start_time,
                state: Mutex::new(SessionState::new(session.clone())),
                finished,
                final_report: OnceCell::new(),
            });

            index.sessions.insert(session_id.clone(), handle);
            index.by_target.insert(target_id.clone(), session_id);
            session
        };

        info!(
            session.id = %session.session_id,
            target.id = %target_id,
            start_time = session.start_time,
            "created session"
        );
        self.publisher.status(session.status_report());
        Ok(session)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.handle(session_id).map(|h| h.snapshot())
    }

    pub fn handle(&self, session_id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.index.read().sessions.get(session_id).cloned()
    }

    /// Like [`handle`](Self::handle) but as an error.
    pub fn require(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        self.handle(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))
    }

    /// The target's most recent session, if it matches `filter`.
    pub fn find_by_target(&self, target_id: &TargetId, filter: StatusFilter) -> Option<Session> {
        let handle = {
            let index = self.index.read();
            let session_id = index.by_target.get(target_id)?;
            index.sessions.get(session_id).cloned()?
        };
        let session = handle.snapshot();
        filter.matches(session.status).then_some(session)
    }

    pub fn list(&self) -> Vec<Session> {
        self.handles().iter().map(|h| h.snapshot()).collect()
    }

    pub fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.index.read().sessions.values().cloned().collect()
    }

    /// Move a session to `to`, broadcasting the new status.
    ///
    /// `stop_time` is stamped on the first move into stopping or a terminal
    /// status and never changes afterwards.
    pub fn transition(
        &self,
        session_id: &SessionId,
        to: SessionStatus,
    ) -> Result<Session, SessionError> {
        self.transition_with(session_id, to, |_| {})
    }

    /// Like [`transition`](Self::transition), applying `update` under the
    /// same lock only once the move is known to be legal.
    pub fn transition_with(
        &self,
        session_id: &SessionId,
        to: SessionStatus,
        update: impl FnOnce(&mut Session),
    ) -> Result<Session, SessionError> {
        let session = self.apply_transition(session_id, to, update)?;
        self.publisher.status(session.status_report());
        Ok(session)
    }

    /// Move a session to `error`, broadcasting both the status and an error
    /// message for its target.
    pub fn record_error(
        &self,
        session_id: &SessionId,
        message: &str,
        recoverable: bool,
    ) -> Result<Session, SessionError> {
        let failure = SessionFailure {
            message: message.to_string(),
            recoverable,
        };
        let session = self.apply_transition(session_id, SessionStatus::Error, |session| {
            session.error = Some(failure);
        })?;

        warn!(
            session.id = %session_id,
            target.id = %session.target_id,
            recoverable,
            "session failed: {}",
            message
        );
        self.publisher.status(session.status_report());
        self.publisher
            .error(session.target_id.clone(), message, recoverable);
        Ok(session)
    }

    fn apply_transition(
        &self,
        session_id: &SessionId,
        to: SessionStatus,
        update: impl FnOnce(&mut Session),
    ) -> Result<Session, SessionError> {
        let handle = self.require(session_id)?;
        let mut state = handle.lock();
        let from = state.session.status;

        if !from.can_transition_to(to) {
            return Err(SessionError::IllegalTransition {
                session_id: session_id.clone(),
                from,
                to,
            });
        }

        state.session.status = to;
        if to != SessionStatus::Recording && state.session.stop_time.is_none() {
            state.session.stop_time = Some(self.clock.now_ms());
        }
        update(&mut state.session);

        debug!(session.id = %session_id, %from, %to, "status transition");
        Ok(state.session.clone())
    }

    /// Run `f` against a session's state under its lock.
    pub fn with_state<R>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> Result<R, SessionError> {
        let handle = self.require(session_id)?;
        let mut state = handle.lock();
        Ok(f(&mut state))
    }

    pub fn summary(&self, session_id: &SessionId) -> Result<SessionSummary, SessionError> {
        self.with_state(session_id, |state| state.summary())
    }

    pub fn active_count(&self) -> usize {
        self.handles()
            .iter()
            .filter(|h| h.status().is_active())
            .count()
    }
}
