//! Key-indexed blob storage for tabreel recordings.
//!
//! Recorded sessions are stored as opaque values under string keys such as
//! `{sessionId}:network:batch:0` or `{sessionId}:chunk:12`. The recorder core
//! writes telemetry batches and summaries; the capture process writes media
//! chunks and screenshots directly.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use blobs::{BlobStore, BlobStoreExt, FileStore};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = FileStore::at_path("/tank/tabreel/blobs")?;
//!
//! store.put("7-1000:chunk:0", vec![0x1a, 0x45], "video/webm").await?;
//! store.put_json("7-1000:state", &serde_json::json!({"cookies": []})).await?;
//!
//! if let Some(data) = store.get("7-1000:chunk:0").await? {
//!     println!("Got {} bytes", data.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Writes replace existing values wholesale. Values are immutable once
//! written except by a full rewrite of the same key.

pub mod config;
pub mod key;
pub mod memory;
pub mod metadata;
pub mod store;

pub use config::BlobsConfig;
pub use key::KeyDigest;
pub use memory::MemoryStore;
pub use metadata::BlobMetadata;
pub use store::{BlobStore, BlobStoreExt, FileStore};
