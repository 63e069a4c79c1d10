//! Key/value cache contract and an in-process backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};

#[derive(thiserror::Error, Debug)]
/// Errors raised by cache backends.
pub enum CacheError {
    /// The storage layer failed.
    #[error("Cache backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded or encoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A live cache entry.
pub struct CachedValue {
    /// Stored bytes.
    pub bytes: Vec<u8>,
    /// When the entry was written.
    pub created: DateTime<Utc>,
}

impl CachedValue {
    /// Time elapsed since the entry was written.
    #[must_use]
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.created
    }
}

#[async_trait]
/// Storage used to avoid re-scraping the council site.
pub trait Cache: Send + Sync {
    /// Read a live entry. Expired entries are removed and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] when the backend fails.
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError>;

    /// Store `value` under `key` for `ttl`. A zero or negative `ttl` stores an
    /// entry that is already expired.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] when the backend fails.
    async fn set(&self, key: &str, value: &[u8], ttl: TimeDelta) -> Result<(), CacheError>;
}

/// SHA-256 hex digest of `key`, for backends that restrict key characters.
#[must_use]
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[derive(Debug)]
struct MemoryEntry {
    bytes: Vec<u8>,
    created: DateTime<Utc>,
    expires: DateTime<Utc>,
}

/// Cache held in process memory; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_poisoned| CacheError::Backend("memory cache lock poisoned".into()))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let hashed = hash_key(key);
        let mut entries = self.lock()?;
        let Some(entry) = entries.get(&hashed) else {
            return Ok(None);
        };
        if Utc::now() >= entry.expires {
            entries.remove(&hashed);
            return Ok(None);
        }
        Ok(Some(CachedValue {
            bytes: entry.bytes.clone(),
            created: entry.created,
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: TimeDelta) -> Result<(), CacheError> {
        let now = Utc::now();
        let entry = MemoryEntry {
            bytes: value.to_vec(),
            created: now,
            expires: now + ttl,
        };
        self.lock()?.insert(hash_key(key), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_is_hex_sha256() {
        let hashed = hash_key("https://www.swindon.gov.uk/site/images/bin.png");
        assert_eq!(hashed.len(), 64);
        assert!(hashed.bytes().all(|byte| byte.is_ascii_hexdigit()));
        assert!(!hashed.contains('/'));
        assert_eq!(hashed, hash_key("https://www.swindon.gov.uk/site/images/bin.png"));
    }

    #[tokio::test]
    async fn stores_and_returns_live_entries() {
        let cache = MemoryCache::new();
        let value = br#"{"address":"Test Address","collections":[]}"#;
        cache
            .set("12345", value, TimeDelta::hours(1))
            .await
            .expect("set");

        let cached = cache.get("12345").await.expect("get").expect("hit");
        assert_eq!(cached.bytes, value);
        assert!(cached.created.timestamp() > 0);
        assert!(cached.age() >= TimeDelta::zero());
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_removed() {
        let cache = MemoryCache::new();
        cache
            .set("54321", b"stale", TimeDelta::hours(-1))
            .await
            .expect("set");

        assert_eq!(cache.get("54321").await.expect("get"), None);
        assert!(cache.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn unknown_keys_are_misses() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("missing").await.expect("get"), None);
    }
}
