//! Sidecar metadata for stored blobs.
//!
//! Hashed filenames lose the original key, so the sidecar records it along
//! with the content type and size.

use serde::{Deserialize, Serialize};

/// Metadata stored alongside a blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMetadata {
    /// The key the blob was written under.
    pub key: String,

    /// MIME type of the content (e.g., "application/json", "video/webm").
    pub content_type: String,

    /// Size of the content in bytes.
    pub size: u64,
}

impl BlobMetadata {
    pub fn new(key: impl Into<String>, content_type: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_json_shape() {
        let meta = BlobMetadata::new("s:metadata", "application/json", 42);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["key"], "s:metadata");
        assert_eq!(json["content_type"], "application/json");
        assert_eq!(json["size"], 42);
    }
}
