//! Outward notifications.
//!
//! Every broadcast goes through a tokio broadcast channel. Delivery is best
//! effort: a send with no live receiver is logged and dropped, and a slow
//! receiver that lags simply misses messages.

use std::sync::Arc;

use reelproto::{Envelope, Outbound, StatusReport, TargetId};
use tokio::sync::broadcast;
use tracing::debug;

use crate::sync::Clock;

#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<Envelope<Outbound>>,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, clock }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope<Outbound>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send a message to every subscriber. Never fails.
    pub fn publish(&self, message: Outbound) {
        let kind = outbound_kind(&message);
        let envelope = Envelope::new(message, self.clock.now_ms());
        if let Err(e) = self.tx.send(envelope) {
            debug!(kind, "no subscribers for broadcast: {}", e);
        }
    }

    pub fn status(&self, report: StatusReport) {
        self.publish(Outbound::Status(report));
    }

    pub fn error(&self, target_id: TargetId, error: impl Into<String>, recoverable: bool) {
        self.publish(Outbound::Error {
            target_id,
            error: error.into(),
            recoverable,
        });
    }
}

fn outbound_kind(message: &Outbound) -> &'static str {
    match message {
        Outbound::Status(_) => "status",
        Outbound::Error { .. } => "error",
        Outbound::StartCapture { .. } => "start-capture",
        Outbound::StopCapture { .. } => "stop-capture",
        Outbound::StartPageRecording { .. } => "start-page-recording",
        Outbound::StopPageRecording { .. } => "stop-page-recording",
        Outbound::SerializePage { .. } => "serialize-page",
        Outbound::Reply(_) => "reply",
    }
}
