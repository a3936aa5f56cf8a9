//! Blob store location and write policy.
//!
//! Layout under `base_path`:
//! ```text
//! objects/   sharded blob files
//! metadata/  JSON sidecars ({key, content_type, size})
//! staging/   in-progress writes, renamed into objects/ when complete
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a filesystem blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobsConfig {
    /// Base path for storage.
    pub base_path: PathBuf,

    /// Whether to write metadata JSON alongside objects.
    #[serde(default = "default_true")]
    pub store_metadata: bool,

    /// Read-only mode - rejects puts and deletes.
    #[serde(default)]
    pub read_only: bool,
}

fn default_true() -> bool {
    true
}

impl BlobsConfig {
    /// Create a config with a specific base path.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            store_metadata: true,
            read_only: false,
        }
    }

    /// Create a read-only config, as used by `tabreel export`.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            store_metadata: false,
            read_only: true,
        }
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.base_path.join("metadata")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.base_path.join("staging")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_base_path() {
        let config = BlobsConfig::with_base_path("/custom/path");
        assert_eq!(config.base_path, PathBuf::from("/custom/path"));
        assert!(config.store_metadata);
        assert!(!config.read_only);
    }

    #[test]
    fn test_read_only_config() {
        let config = BlobsConfig::read_only("/tank/reels");
        assert!(!config.store_metadata);
        assert!(config.read_only);
    }

    #[test]
    fn test_layout_dirs() {
        let config = BlobsConfig::with_base_path("/test/blobs");
        assert_eq!(config.objects_dir(), PathBuf::from("/test/blobs/objects"));
        assert_eq!(config.metadata_dir(), PathBuf::from("/test/blobs/metadata"));
        assert_eq!(config.staging_dir(), PathBuf::from("/test/blobs/staging"));
    }
}
