//! Request/response correlation for one session.
//!
//! The network inspector reports each request in two phases: request-sent,
//! then either response-received or load-failed. The table holds the first
//! half until the second arrives, then emits a complete [`NetworkEvent`].
//!
//! Entries that never complete are dropped by [`RequestTable::sweep`], which
//! the flush manager runs on every flush.

use std::collections::HashMap;
use std::time::Duration;

use reelproto::{
    FailureFields, NetworkEvent, RequestFields, ResourceType, ResponseFields,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::redact::redact_headers;
use crate::sync::video_offset_from_secs;

/// First half of a request, waiting for its outcome.
#[derive(Debug, Clone)]
struct PendingRequest {
    fields: RequestFields,
}

/// Counts of correlation anomalies. None of these are session errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationStats {
    /// Outcomes for a request id that was never seen or already evicted.
    pub unknown_responses: u64,
    /// Entries dropped for missing request id, url or method.
    pub malformed: u64,
    /// Entries removed by the TTL sweep.
    pub evicted: u64,
    /// Completed events discarded by the retention policy.
    pub filtered: u64,
    /// Request-sent deliveries that replaced an existing entry.
    pub duplicates: u64,
}

/// How a request ended.
enum Outcome {
    Response(ResponseFields),
    Failure(FailureFields),
}

impl Outcome {
    fn resource_type(&self) -> Option<ResourceType> {
        match self {
            Outcome::Response(r) => r.resource_type,
            Outcome::Failure(f) => f.resource_type,
        }
    }

    fn timestamp(&self) -> f64 {
        match self {
            Outcome::Response(r) => r.timestamp,
            Outcome::Failure(f) => f.timestamp,
        }
    }
}

/// Pending requests for one session, keyed by request id.
#[derive(Debug, Default)]
pub struct RequestTable {
    pending: HashMap<String, PendingRequest>,
    stats: CorrelationStats,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the first half of a request. A repeated id replaces the
    /// earlier entry.
    pub fn on_request_sent(&mut self, request_id: &str, fields: RequestFields) {
        if self
            .pending
            .insert(request_id.to_string(), PendingRequest { fields })
            .is_some()
        {
            self.stats.duplicates += 1;
            debug!(request.id = request_id, "replaced pending request");
        }
    }

    /// Complete a request with its response.
    ///
    /// Returns `None` when the request is unknown, malformed, or filtered out
    /// by the retention policy.
    pub fn on_response_received(
        &mut self,
        request_id: &str,
        response: ResponseFields,
        t0: i64,
    ) -> Option<NetworkEvent> {
        self.complete(request_id, Outcome::Response(response), t0)
    }

    /// Complete a request that failed to load. The event has no status and
    /// carries the error text as its status text.
    pub fn on_load_failed(
        &mut self,
        request_id: &str,
        failure: FailureFields,
        t0: i64,
    ) -> Option<NetworkEvent> {
        self.complete(request_id, Outcome::Failure(failure), t0)
    }

    fn complete(&mut self, request_id: &str, outcome: Outcome, t0: i64) -> Option<NetworkEvent> {
        let Some(pending) = self.pending.remove(request_id) else {
            self.stats.unknown_responses += 1;
            debug!(request.id = request_id, "outcome for unknown request");
            return None;
        };

        let request = pending.fields;
        let (url, method) = match (request.url, request.method) {
            (Some(url), Some(method))
                if !request_id.is_empty() && !url.is_empty() && !method.is_empty() =>
            {
                (url, method)
            }
            _ => {
                self.stats.malformed += 1;
                debug!(request.id = request_id, "dropping malformed request");
                return None;
            }
        };

        let resource_type = outcome.resource_type().unwrap_or(request.resource_type);
        let duration_ms = if request.timestamp > 0.0 && outcome.timestamp() >= request.timestamp {
            Some(((outcome.timestamp() - request.timestamp) * 1000.0).round() as i64)
        } else {
            None
        };

        let (status, status_text, mime_type, response_headers) = match outcome {
            Outcome::Response(r) => (
                Some(r.status),
                r.status_text,
                r.mime_type,
                redact_headers(&r.headers),
            ),
            Outcome::Failure(f) => (None, f.error_text, None, Default::default()),
        };

        let event = NetworkEvent {
            request_id: request_id.to_string(),
            url,
            method,
            status,
            status_text,
            resource_type,
            mime_type,
            request_headers: redact_headers(&request.headers),
            response_headers,
            request_body: request.post_data,
            duration_ms,
            wall_time: request.wall_time,
            video_offset: video_offset_from_secs(request.wall_time, t0),
        };

        if is_retained(&event) {
            Some(event)
        } else {
            self.stats.filtered += 1;
            None
        }
    }

    /// Drop every entry whose request wall clock is older than `ttl` at
    /// `now_ms`, whether or not it could still complete. Returns the number
    /// removed.
    pub fn sweep(&mut self, now_ms: i64, ttl: Duration) -> usize {
        let cutoff = now_ms - ttl.as_millis() as i64;
        let before = self.pending.len();
        self.pending
            .retain(|_, p| (p.fields.wall_time * 1000.0).round() as i64 >= cutoff);

        let evicted = before - self.pending.len();
        if evicted > 0 {
            self.stats.evicted += evicted as u64;
            debug!(evicted, remaining = self.pending.len(), "evicted stale requests");
        }
        evicted
    }

    /// Drop all pending entries. Statistics are kept.
    pub fn release(&mut self) {
        self.pending.clear();
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> CorrelationStats {
        self.stats
    }
}

/// API traffic and navigations are always kept; anything else only on error.
pub fn is_retained(event: &NetworkEvent) -> bool {
    event.resource_type.is_always_retained() || event.status.is_some_and(|s| s >= 400)
}
