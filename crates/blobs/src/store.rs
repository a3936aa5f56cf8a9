//! FileStore: filesystem-backed key-indexed blob storage.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── objects/
//! │   └── ab/
//! │       └── cde123...        # blob bytes (remainder of key digest)
//! ├── metadata/
//! │   └── ab/
//! │       └── cde123....json   # {key, content_type, size}
//! └── staging/
//!     └── 4f0c...              # write in progress
//! ```
//!
//! Writes land in `staging/` first and are renamed over the object path, so a
//! reader never sees a half-written blob and a rewrite replaces it wholesale.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::BlobsConfig;
use crate::key::KeyDigest;
use crate::metadata::BlobMetadata;

/// Opaque key-indexed blob storage.
///
/// Keys are arbitrary strings. `put` replaces any existing value for the key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous value.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    /// Fetch the bytes stored under `key`.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether `key` exists without reading it.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove `key`. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Sidecar metadata for `key`, if stored.
    async fn inspect(&self, key: &str) -> Result<Option<BlobMetadata>>;
}

/// JSON helpers available on every store.
#[async_trait]
pub trait BlobStoreExt: BlobStore {
    async fn put_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec(value)
            .with_context(|| format!("failed to serialize value for {}", key))?;
        self.put(key, bytes, "application/json").await
    }

    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("failed to parse JSON stored at {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl<S: BlobStore + ?Sized> BlobStoreExt for S {}

/// Filesystem-based blob store.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: BlobsConfig,
}

impl FileStore {
    /// Create a new FileStore with the given configuration.
    ///
    /// Creates the layout directories if they don't exist (unless read-only).
    pub fn new(config: BlobsConfig) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(config.objects_dir())
                .context("failed to create blob objects directory")?;
            fs::create_dir_all(config.metadata_dir())
                .context("failed to create blob metadata directory")?;
            fs::create_dir_all(config.staging_dir())
                .context("failed to create blob staging directory")?;
        }

        Ok(Self { config })
    }

    /// Create a FileStore at a specific path.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(BlobsConfig::with_base_path(path))
    }

    /// Create a read-only FileStore at a specific path.
    pub fn read_only_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(BlobsConfig::read_only(path))
    }

    pub fn config(&self) -> &BlobsConfig {
        &self.config
    }

    fn object_path(&self, digest: &KeyDigest) -> PathBuf {
        self.config
            .objects_dir()
            .join(digest.prefix())
            .join(digest.remainder())
    }

    fn metadata_path(&self, digest: &KeyDigest) -> PathBuf {
        self.config
            .metadata_dir()
            .join(digest.prefix())
            .join(format!("{}.json", digest.remainder()))
    }

    fn staging_path(&self) -> PathBuf {
        self.config.staging_dir().join(Uuid::new_v4().simple().to_string())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            anyhow::bail!("blob store is in read-only mode");
        }
        Ok(())
    }

    /// Write through staging, then rename over the destination.
    fn write_replacing(&self, dest: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("failed to create prefix directory")?;
        }

        let staging = self.staging_path();
        fs::write(&staging, data).context("failed to write staging file")?;
        if let Err(e) = fs::rename(&staging, dest) {
            let _ = fs::remove_file(&staging);
            return Err(e).context("failed to move staging file into place");
        }
        Ok(())
    }

    fn put_blocking(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        self.ensure_writable()?;

        let digest = KeyDigest::of(key);
        self.write_replacing(&self.object_path(&digest), data)
            .with_context(|| format!("failed to store {}", key))?;

        if self.config.store_metadata {
            let metadata = BlobMetadata::new(key, content_type, data.len() as u64);
            let json = serde_json::to_vec(&metadata).context("failed to serialize metadata")?;
            self.write_replacing(&self.metadata_path(&digest), &json)
                .with_context(|| format!("failed to store metadata for {}", key))?;
        }

        Ok(())
    }

    fn get_blocking(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(&KeyDigest::of(key));
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", key)),
        }
    }

    fn delete_blocking(&self, key: &str) -> Result<bool> {
        self.ensure_writable()?;

        let digest = KeyDigest::of(key);
        let removed = match fs::remove_file(self.object_path(&digest)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e).with_context(|| format!("failed to delete {}", key)),
        };

        let meta_path = self.metadata_path(&digest);
        if meta_path.exists() {
            fs::remove_file(&meta_path)
                .with_context(|| format!("failed to delete metadata for {}", key))?;
        }

        Ok(removed)
    }

    fn inspect_blocking(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let digest = KeyDigest::of(key);
        let obj_path = self.object_path(&digest);
        if !obj_path.exists() {
            return Ok(None);
        }

        let meta_path = self.metadata_path(&digest);
        if meta_path.exists() {
            let json = fs::read(&meta_path).context("failed to read metadata file")?;
            let metadata: BlobMetadata =
                serde_json::from_slice(&json).context("failed to parse metadata")?;
            Ok(Some(metadata))
        } else {
            // No sidecar - infer size from file, use generic content type
            let size = fs::metadata(&obj_path)
                .context("failed to stat object file")?
                .len();
            Ok(Some(BlobMetadata::new(key, "application/octet-stream", size)))
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(FileStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .context("blob store task panicked")?
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let key = key.to_string();
        let content_type = content_type.to_string();
        self.blocking(move |store| store.put_blocking(&key, &data, &content_type))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |store| store.get_blocking(&key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.object_path(&KeyDigest::of(key)).exists())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.blocking(move |store| store.delete_blocking(&key)).await
    }

    async fn inspect(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let key = key.to_string();
        self.blocking(move |store| store.inspect_blocking(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        store.put("s1:chunk:0", b"webm bytes".to_vec(), "video/webm").await?;

        let data = store.get("s1:chunk:0").await?.expect("should exist");
        assert_eq!(data, b"webm bytes");
        assert!(store.get("s1:chunk:1").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_put_replaces_wholesale() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        store.put("s1:state", b"first, longer value".to_vec(), "application/json").await?;
        store.put("s1:state", b"second".to_vec(), "application/json").await?;

        assert_eq!(store.get("s1:state").await?.unwrap(), b"second");
        let meta = store.inspect("s1:state").await?.unwrap();
        assert_eq!(meta.size, 6);

        Ok(())
    }

    #[tokio::test]
    async fn test_inspect_records_key() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        store.put("s1:metadata", b"{}".to_vec(), "application/json").await?;

        let meta = store.inspect("s1:metadata").await?.expect("should be inspectable");
        assert_eq!(meta, BlobMetadata::new("s1:metadata", "application/json", 2));
        assert!(store.inspect("missing").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_exists_and_delete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        store.put("k", b"v".to_vec(), "text/plain").await?;
        assert!(store.exists("k").await?);

        assert!(store.delete("k").await?);
        assert!(!store.exists("k").await?);
        assert!(!store.delete("k").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_staging_is_empty_after_writes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FileStore::at_path(temp_dir.path())?;

        for i in 0..5 {
            store.put(&format!("s:console:batch:{}", i), vec![i as u8], "application/json").await?;
        }

        let leftovers = fs::read_dir(store.config().staging_dir())?.count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writer = FileStore::at_path(temp_dir.path())?;
        writer.put("k", b"v".to_vec(), "text/plain").await?;

        let reader = FileStore::read_only_at(temp_dir.path())?;
        assert_eq!(reader.get("k").await?.unwrap(), b"v");
        assert!(reader.put("k", b"x".to_vec(), "text/plain").await.is_err());
        assert!(reader.delete("k").await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_json_helpers() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store: Arc<dyn BlobStore> = Arc::new(FileStore::at_path(temp_dir.path())?);

        store.put_json("s:console:batch:0", &vec!["a", "b"]).await?;
        let back: Option<Vec<String>> = store.get_json("s:console:batch:0").await?;
        assert_eq!(back, Some(vec!["a".to_string(), "b".to_string()]));

        let missing: Option<Vec<String>> = store.get_json("s:console:batch:1").await?;
        assert!(missing.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_writers() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FileStore::at_path(temp_dir.path())?);

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(&format!("s:network:batch:{}", i), format!("batch {}", i).into_bytes(), "application/json")
                    .await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        for i in 0..10 {
            let data = store.get(&format!("s:network:batch:{}", i)).await?.unwrap();
            assert_eq!(data, format!("batch {}", i).into_bytes());
        }
        Ok(())
    }
}
