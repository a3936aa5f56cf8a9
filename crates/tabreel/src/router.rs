//! Session event router.
//!
//! Every inbound message, whatever transport it arrived on, is queued to one
//! dispatch loop. The loop handles messages in arrival order, so events from
//! one producer reach the buffers in the order they were sent.
//!
//! Request messages (start, stop, status query) carry a oneshot for their
//! [`Reply`]. Everything else is fire-and-forget: failures are logged.
//!
//! The loop never awaits the blob store. Writes are handed to background
//! tasks, and a status query that misses the registry is answered from a
//! task of its own, so a slow store cannot hold up other sessions.

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use reelproto::{Envelope, Inbound, Reply};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::keys::BlobKind;
use crate::recorder::Recorder;

/// One queued inbound message.
#[derive(Debug)]
pub struct RouterCommand {
    pub envelope: Envelope<Inbound>,
    pub reply: Option<oneshot::Sender<Reply>>,
}

/// Cheap handle for queueing messages to the router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Queue a message without waiting for its outcome.
    pub async fn send(&self, envelope: Envelope<Inbound>) -> Result<()> {
        self.tx
            .send(RouterCommand {
                envelope,
                reply: None,
            })
            .await
            .context("router is not running")
    }

    /// Queue a message and wait for its reply.
    ///
    /// Messages that do not expect a reply are answered with an ack once
    /// they have been dispatched.
    pub async fn request(&self, envelope: Envelope<Inbound>) -> Result<Reply> {
        let reply_rx = self.submit(envelope).await?;
        reply_rx.await.context("router dropped the request")
    }

    /// Queue a message and return the receiver its reply will arrive on.
    /// The message keeps its place in the queue relative to later sends.
    pub async fn submit(&self, envelope: Envelope<Inbound>) -> Result<oneshot::Receiver<Reply>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RouterCommand {
                envelope,
                reply: Some(reply_tx),
            })
            .await
            .context("router is not running")?;
        Ok(reply_rx)
    }
}

pub struct Router {
    recorder: Recorder,
    rx: mpsc::Receiver<RouterCommand>,
}

impl Router {
    pub fn new(recorder: Recorder, capacity: usize) -> (Self, RouterHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { recorder, rx }, RouterHandle { tx })
    }

    /// Dispatch queued messages until `shutdown` fires or every handle is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("session router started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.rx.recv() => {
                    let Some(RouterCommand { envelope, reply }) = command else {
                        break;
                    };
                    let kind = envelope.message.kind();
                    match (dispatch(&self.recorder, envelope.message), reply) {
                        (_, None) => {}
                        (Dispatched::Done(response), Some(reply_tx)) => {
                            send_reply(kind, reply_tx, response.unwrap_or_else(|| Reply::ack(kind)));
                        }
                        (Dispatched::Pending(response), Some(reply_tx)) => {
                            self.recorder.spawn(async move {
                                send_reply(kind, reply_tx, response.await);
                            });
                        }
                    }
                }
            }
        }
        info!("session router stopped");
    }
}

fn send_reply(kind: &'static str, reply_tx: oneshot::Sender<Reply>, response: Reply) {
    if reply_tx.send(response).is_err() {
        debug!(kind, "requester went away before the reply");
    }
}

/// Outcome of dispatching one message.
pub enum Dispatched {
    /// Handled inline. Carries the reply for request messages and `None`
    /// for everything else.
    Done(Option<Reply>),
    /// The reply needs a store read and resolves off the dispatch loop.
    Pending(BoxFuture<'static, Reply>),
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done(reply) => f.debug_tuple("Done").field(reply).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl Dispatched {
    /// The reply, waiting for it if it is pending.
    pub async fn reply(self) -> Option<Reply> {
        match self {
            Self::Done(reply) => reply,
            Self::Pending(reply) => Some(reply.await),
        }
    }
}

/// Handle one message without waiting on the blob store.
#[tracing::instrument(skip_all, fields(kind = message.kind()))]
pub fn dispatch(recorder: &Recorder, message: Inbound) -> Dispatched {
    let reply = match message {
        Inbound::SessionStart {
            target_id,
            wants_audio,
            wants_mic,
        } => Some(
            match recorder.start_session(&target_id, wants_audio, wants_mic) {
                Ok(session_id) => Reply::Started { session_id },
                Err(e) => Reply::error(e.to_string()),
            },
        ),

        Inbound::SessionStop { target_id } => Some(match recorder.stop_session(&target_id) {
            Ok(session) => Reply::ack(format!(
                "session {} {}",
                session.session_id, session.status
            )),
            Err(e) => Reply::error(e.to_string()),
        }),

        Inbound::StatusQuery { target_id } => match recorder.live_status(&target_id) {
            Some(report) => Some(Reply::Status(report)),
            None => {
                let recorder = recorder.clone();
                return Dispatched::Pending(
                    async move { Reply::Status(recorder.stored_status(&target_id).await) }.boxed(),
                );
            }
        },

        Inbound::CaptureReady {
            session_id,
            capability_state,
            mic_failed,
        } => {
            log_failure(
                "capture-ready",
                recorder
                    .capture_ready(&session_id, capability_state, mic_failed)
                    .map(|_| ())
                    .map_err(Into::into),
            );
            None
        }

        Inbound::CaptureError {
            session_id,
            stage,
            error,
        } => {
            log_failure(
                "capture-error",
                recorder
                    .capture_error(&session_id, stage, &error)
                    .map(|_| ())
                    .map_err(Into::into),
            );
            None
        }

        Inbound::CaptureFinished {
            session_id,
            final_count,
        } => {
            log_failure(
                "capture-finished",
                recorder
                    .capture_finished(&session_id, final_count)
                    .map_err(Into::into),
            );
            None
        }

        Inbound::DebuggerDetached { session_id, reason } => {
            log_failure(
                "debugger-detached",
                recorder
                    .debugger_detached(&session_id, reason.as_deref())
                    .map_err(Into::into),
            );
            None
        }

        Inbound::ChunkStored(blob) => {
            log_failure(
                "chunk-stored",
                recorder.blob_stored(BlobKind::Chunk, blob).map_err(Into::into),
            );
            None
        }

        Inbound::ScreenshotStored(blob) => {
            log_failure(
                "screenshot-stored",
                recorder
                    .blob_stored(BlobKind::Screenshot, blob)
                    .map_err(Into::into),
            );
            None
        }

        Inbound::NetworkRequest(sent) => {
            log_failure("network-request", recorder.network_request(sent).map_err(Into::into));
            None
        }

        Inbound::NetworkResponse(received) => {
            log_failure(
                "network-response",
                recorder.network_response(received).map_err(Into::into),
            );
            None
        }

        Inbound::NetworkFailed(failed) => {
            log_failure("network-failed", recorder.network_failed(failed).map_err(Into::into));
            None
        }

        Inbound::Console(entry) => {
            log_failure("console", recorder.console(entry).map_err(Into::into));
            None
        }

        Inbound::Dom(interaction) => {
            log_failure("dom", recorder.dom(interaction).map_err(Into::into));
            None
        }

        Inbound::StateSnapshot(snapshot) => {
            log_failure(
                "state-snapshot",
                recorder.state_snapshot(snapshot).map_err(Into::into),
            );
            None
        }
    };
    Dispatched::Done(reply)
}

fn log_failure(kind: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(kind, "dropped message: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RecordingSettings;
    use crate::sync::ManualClock;
    use blobs::MemoryStore;
    use reelproto::{SessionId, SessionStatus, TargetId};
    use std::sync::Arc;

    fn recorder() -> Recorder {
        Recorder::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1000)),
            RecordingSettings::default(),
            64,
        )
    }

    #[tokio::test]
    async fn test_start_replies_with_session_id() {
        let recorder = recorder();
        let reply = dispatch(
            &recorder,
            Inbound::SessionStart {
                target_id: TargetId::from("4"),
                wants_audio: false,
                wants_mic: false,
            },
        )
        .reply()
        .await;
        assert_eq!(
            reply,
            Some(Reply::Started {
                session_id: SessionId::from("4-1000")
            })
        );
    }

    #[tokio::test]
    async fn test_duplicate_start_replies_error() {
        let recorder = recorder();
        let start = Inbound::SessionStart {
            target_id: TargetId::from("4"),
            wants_audio: false,
            wants_mic: false,
        };
        dispatch(&recorder, start.clone());
        let reply = dispatch(&recorder, start).reply().await.unwrap();
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn test_fire_and_forget_for_unknown_session() {
        let recorder = recorder();
        let reply = dispatch(
            &recorder,
            Inbound::CaptureFinished {
                session_id: SessionId::from("ghost"),
                final_count: 3,
            },
        )
        .reply()
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_run_loop_answers_requests() {
        let recorder = recorder();
        let (router, handle) = Router::new(recorder, 8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(router.run(shutdown.clone()));

        let reply = handle
            .request(Envelope::new(
                Inbound::StatusQuery {
                    target_id: TargetId::from("9"),
                },
                0,
            ))
            .await
            .unwrap();
        match reply {
            Reply::Status(report) => assert_eq!(report.status, SessionStatus::Idle),
            other => panic!("unexpected reply {other:?}"),
        }

        // Non-request messages are acked once dispatched
        let ack = handle
            .request(Envelope::new(
                Inbound::DebuggerDetached {
                    session_id: SessionId::from("ghost"),
                    reason: None,
                },
                0,
            ))
            .await
            .unwrap();
        assert!(matches!(ack, Reply::Ack { .. }));

        shutdown.cancel();
        task.await.unwrap();
    }
}
