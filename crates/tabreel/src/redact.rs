//! Header redaction for recorded network traffic.

use reelproto::Headers;

/// Replacement value for sensitive headers.
pub const REDACTED: &str = "[REDACTED]";

/// Header names whose values never reach storage, compared case-insensitively.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "api-key",
    "apikey",
    "x-api-key",
    "x-apikey",
];

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Copy of `headers` with sensitive values replaced. Names are kept as sent.
pub fn redact_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            if is_sensitive(name) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
