//! KeyDigest: the on-disk name of a blob key.
//!
//! Keys are free-form strings containing `:` and arbitrary ids, so they are
//! never used as filenames directly. The BLAKE3 hash of the key, truncated to
//! 128 bits, is sharded by its first two hex chars.

use std::fmt;

/// 128 bits (32 hex chars) of BLAKE3 over the key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyDigest(String);

impl KeyDigest {
    pub fn of(key: &str) -> Self {
        let hash_bytes = blake3::hash(key.as_bytes());
        Self(hex::encode(&hash_bytes.as_bytes()[..16]))
    }

    /// First 2 characters (directory shard).
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Remainder after the prefix (filename).
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
