//! In-memory blob store for tests and ephemeral sessions.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::metadata::BlobMetadata;
use crate::store::BlobStore;

/// A `DashMap`-backed store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (Vec<u8>, BlobMetadata)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let metadata = BlobMetadata::new(key, content_type, data.len() as u64);
        self.entries.insert(key.to_string(), (data, metadata));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.0.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn inspect(&self, key: &str) -> Result<Option<BlobMetadata>> {
        Ok(self.entries.get(key).map(|entry| entry.1.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlobStoreExt;

    #[tokio::test]
    async fn test_memory_roundtrip() -> Result<()> {
        let store = MemoryStore::new();
        store.put("s:chunk:0", vec![1, 2, 3], "video/webm").await?;

        assert_eq!(store.get("s:chunk:0").await?, Some(vec![1, 2, 3]));
        assert_eq!(
            store.inspect("s:chunk:0").await?.map(|m| m.content_type),
            Some("video/webm".to_string())
        );
        assert!(store.delete("s:chunk:0").await?);
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_keys_with_prefix() -> Result<()> {
        let store = MemoryStore::new();
        store.put_json("a:network:batch:1", &1).await?;
        store.put_json("a:network:batch:0", &0).await?;
        store.put_json("b:network:batch:0", &0).await?;

        assert_eq!(
            store.keys_with_prefix("a:"),
            vec!["a:network:batch:0".to_string(), "a:network:batch:1".to_string()]
        );
        Ok(())
    }
}
