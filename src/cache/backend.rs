//! Cache backend implementations.

use super::key::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Response metadata stored next to the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// One cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    pub metadata: ResponseMetadata,
    pub expires_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Bytes, metadata: ResponseMetadata, expires_at: DateTime<Utc>) -> Self {
        Self { key, payload, metadata, expires_at, inserted_at: Utc::now() }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// Bytes charged against a tier's capacity.
    pub fn size(&self) -> u64 {
        let headers: usize = self.metadata.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.payload.len() + self.metadata.url.len() + headers) as u64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Storage tier. Backends store entries verbatim and never look at expiry;
/// freshness is decided by [`CacheStore`](super::CacheStore).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;
    /// Inserts or replaces, evicting other entries to make room. Entries larger
    /// than the whole capacity are not stored.
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;
    async fn set_expiry(&self, key: &CacheKey, expires_at: DateTime<Utc>) -> Result<bool, CacheError>;
    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
    async fn len(&self) -> usize;
    /// Bytes currently charged against capacity.
    async fn usage(&self) -> u64;
    fn name(&self) -> &'static str;
}

struct MemoryState {
    entries: LruCache<CacheKey, CacheEntry>,
    used: u64,
    evictions: u64,
}

/// In-memory tier bounded by total bytes, evicting least recently used.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    capacity: u64,
}

impl MemoryCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState { entries: LruCache::unbounded(), used: 0, evictions: 0 }),
            capacity: capacity_bytes,
        }
    }

    pub async fn evictions(&self) -> u64 {
        self.state.lock().await.evictions
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.state.lock().await.entries.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let size = entry.size();
        let mut st = self.state.lock().await;
        if let Some(old) = st.entries.pop(&entry.key) {
            st.used -= old.size();
        }
        if size > self.capacity {
            return Ok(());
        }
        while st.used + size > self.capacity {
            match st.entries.pop_lru() {
                Some((_, evicted)) => {
                    st.used -= evicted.size();
                    st.evictions += 1;
                }
                None => break,
            }
        }
        st.used += size;
        st.entries.put(entry.key.clone(), entry);
        Ok(())
    }

    async fn set_expiry(&self, key: &CacheKey, expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        let mut st = self.state.lock().await;
        match st.entries.peek_mut(key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut st = self.state.lock().await;
        match st.entries.pop(key) {
            Some(old) => {
                st.used -= old.size();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut st = self.state.lock().await;
        st.entries.clear();
        st.used = 0;
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    async fn usage(&self) -> u64 {
        self.state.lock().await.used
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }
    async fn put(&self, _: CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }
    async fn set_expiry(&self, _: &CacheKey, _: DateTime<Utc>) -> Result<bool, CacheError> {
        Ok(false)
    }
    async fn remove(&self, _: &CacheKey) -> Result<bool, CacheError> {
        Ok(false)
    }
    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
    async fn len(&self) -> usize {
        0
    }
    async fn usage(&self) -> u64 {
        0
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
