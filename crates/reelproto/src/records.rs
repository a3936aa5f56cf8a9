//! Telemetry records as they are persisted in batches.
//!
//! Every completed record carries both the raw timestamp reported by its
//! source and the derived `videoOffset` (milliseconds from session T0).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP header map, name to value.
pub type Headers = BTreeMap<String, String>;

/// Telemetry channel. Each channel is buffered and batched independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Network,
    Console,
    Dom,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Network, Channel::Console, Channel::Dom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Network => "network",
            Channel::Console => "console",
            Channel::Dom => "dom",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource kind as reported by the network inspection protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    EventSource,
    WebSocket,
    Manifest,
    Ping,
    #[default]
    #[serde(other)]
    Other,
}

impl ResourceType {
    /// Kinds kept regardless of status: API traffic and top-level navigations.
    pub fn is_always_retained(&self) -> bool {
        matches!(
            self,
            ResourceType::Xhr | ResourceType::Fetch | ResourceType::WebSocket | ResourceType::Document
        )
    }
}

/// Fields known when a request is issued.
///
/// `timestamp` is the monotonic protocol clock in seconds; `wall_time` is the
/// wall clock in seconds since the epoch with fractional precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestFields {
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Headers,
    pub post_data: Option<String>,
    pub resource_type: ResourceType,
    pub timestamp: f64,
    pub wall_time: f64,
}

/// Fields known when the response headers arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseFields {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub mime_type: Option<String>,
    /// Overrides the kind recorded at request time when present.
    pub resource_type: Option<ResourceType>,
    pub timestamp: f64,
}

/// Fields reported when a request fails to load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureFields {
    pub error_text: String,
    pub canceled: bool,
    pub resource_type: Option<ResourceType>,
    pub timestamp: f64,
}

/// A correlated request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    /// `None` when the load failed before any status was received.
    pub status: Option<u16>,
    pub status_text: String,
    pub resource_type: ResourceType,
    pub mime_type: Option<String>,
    pub request_headers: Headers,
    pub response_headers: Headers,
    pub request_body: Option<String>,
    /// Time between request and response on the monotonic protocol clock.
    pub duration_ms: Option<i64>,
    /// Raw wall clock of the request, seconds since the epoch.
    pub wall_time: f64,
    pub video_offset: i64,
}

impl NetworkEvent {
    pub fn failed(&self) -> bool {
        self.status.is_none()
    }
}

/// Severity of a console entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    #[default]
    Log,
    Info,
    Warn,
    Error,
    #[serde(other)]
    Other,
}

/// Console output from the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    pub text: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub line: Option<u32>,
    /// Raw wall clock, milliseconds since the epoch.
    pub timestamp: i64,
    pub video_offset: i64,
}

/// A user interaction observed by the on-page listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomEvent {
    /// Interaction kind (`click`, `input`, `submit`, `navigation`, ...).
    pub kind: String,
    pub selector: Option<String>,
    pub text: Option<String>,
    pub value: Option<String>,
    pub url: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Raw wall clock, milliseconds since the epoch.
    pub timestamp: i64,
    pub video_offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_protocol_names() {
        let xhr: ResourceType = serde_json::from_str("\"XHR\"").unwrap();
        assert_eq!(xhr, ResourceType::Xhr);
        let ws: ResourceType = serde_json::from_str("\"WebSocket\"").unwrap();
        assert_eq!(ws, ResourceType::WebSocket);
        let unknown: ResourceType = serde_json::from_str("\"Prefetch\"").unwrap();
        assert_eq!(unknown, ResourceType::Other);
    }

    #[test]
    fn test_retained_kinds() {
        assert!(ResourceType::Fetch.is_always_retained());
        assert!(ResourceType::Document.is_always_retained());
        assert!(!ResourceType::Image.is_always_retained());
        assert!(!ResourceType::Font.is_always_retained());
    }

    #[test]
    fn test_request_fields_defaults() {
        let fields: RequestFields =
            serde_json::from_str(r#"{"url":"https://example.test/","wallTime":1.05}"#).unwrap();
        assert_eq!(fields.url.as_deref(), Some("https://example.test/"));
        assert!(fields.method.is_none());
        assert_eq!(fields.resource_type, ResourceType::Other);
        assert_eq!(fields.wall_time, 1.05);
    }

    #[test]
    fn test_channel_names() {
        let names: Vec<_> = Channel::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["network", "console", "dom"]);
    }
}
