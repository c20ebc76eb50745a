//! Cache store: expiry-aware front for the memory and disk tiers.

use super::backend::{CacheBackend, CacheEntry, CacheError, MemoryCache, NullCache, ResponseMetadata};
use super::disk::DiskCache;
use super::key::{CacheKey, CacheKeyGenerator, DEFAULT_KEY_HEADERS};
use crate::request::PreparedRequest;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Default disk budget: 150 MiB.
pub const DEFAULT_DISK_CAPACITY: u64 = 150 * 1024 * 1024;
/// Default memory budget: disk-only.
pub const DEFAULT_MEMORY_CAPACITY: u64 = 0;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Disk tier location. `None` uses the platform cache directory.
    pub directory: Option<PathBuf>,
    pub disk_capacity: u64,
    pub memory_capacity: u64,
    /// Request headers that take part in the cache key.
    pub key_headers: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            disk_capacity: DEFAULT_DISK_CAPACITY,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            key_headers: DEFAULT_KEY_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by env:
    /// - `CACHELANE_CACHE_DIR`
    /// - `CACHELANE_DISK_CAPACITY_BYTES`
    /// - `CACHELANE_MEMORY_CAPACITY_BYTES`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = env::var("CACHELANE_CACHE_DIR") {
            if !dir.trim().is_empty() {
                cfg.directory = Some(PathBuf::from(dir));
            }
        }
        if let Some(n) = env::var("CACHELANE_DISK_CAPACITY_BYTES").ok().and_then(|s| s.parse::<u64>().ok()) {
            cfg.disk_capacity = n;
        }
        if let Some(n) = env::var("CACHELANE_MEMORY_CAPACITY_BYTES").ok().and_then(|s| s.parse::<u64>().ok()) {
            cfg.memory_capacity = n;
        }
        cfg
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    pub fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity = bytes;
        self
    }

    /// Zero disables the memory tier.
    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity = bytes;
        self
    }

    pub fn with_key_headers<I: IntoIterator<Item = S>, S: Into<String>>(mut self, headers: I) -> Self {
        self.key_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::cache_dir().unwrap_or_else(env::temp_dir).join("cachelane")
        })
    }
}

/// Counters since the store was opened.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    /// Forced reads that found an entry.
    pub stale_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Single source of truth for whether a request's data is still fresh.
///
/// Reads go memory tier first, then disk. A fresh disk hit is promoted into
/// the memory tier. Writes go to both tiers. All methods take `&self`; the
/// tiers do their own locking.
pub struct CacheStore {
    config: CacheConfig,
    memory: Option<Box<dyn CacheBackend>>,
    disk: Box<dyn CacheBackend>,
    keys: CacheKeyGenerator,
    stats: AtomicStats,
}

impl CacheStore {
    /// Opens the store described by `config`, creating the disk directory.
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let disk: Box<dyn CacheBackend> = if config.enabled && config.disk_capacity > 0 {
            Box::new(DiskCache::open(config.resolved_directory(), config.disk_capacity).await?)
        } else {
            Box::new(NullCache::new())
        };
        let memory: Option<Box<dyn CacheBackend>> = if config.enabled && config.memory_capacity > 0 {
            Some(Box::new(MemoryCache::new(config.memory_capacity)))
        } else {
            None
        };
        Ok(Self::with_backends(config, memory, disk))
    }

    /// Builds a store over caller-provided tiers.
    pub fn with_backends(config: CacheConfig, memory: Option<Box<dyn CacheBackend>>, disk: Box<dyn CacheBackend>) -> Self {
        let keys = CacheKeyGenerator::with_headers(&config.key_headers);
        Self { config, memory, disk, keys, stats: AtomicStats::default() }
    }

    pub fn key_for(&self, request: &PreparedRequest) -> CacheKey {
        self.keys.generate(request)
    }

    /// Fresh read: entries whose expiry has passed are reported as absent.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let now = Utc::now();
        match self.lookup(key).await {
            Ok(Some((entry, tier))) if entry.is_fresh_at(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                if tier == Tier::Disk {
                    self.promote(&entry).await;
                }
                Ok(Some(entry))
            }
            Ok(_) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Forced read that ignores expiry. Used for stale fallback only.
    pub async fn get_forced(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.lookup(key).await {
            Ok(found) => {
                if found.is_some() {
                    self.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(found.map(|(entry, _)| entry))
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Inserts or replaces the entry for `key`.
    pub async fn put(&self, key: &CacheKey, payload: Bytes, metadata: ResponseMetadata, expires_at: DateTime<Utc>) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let entry = CacheEntry::new(key.clone(), payload, metadata, expires_at);
        if let Some(ref memory) = self.memory {
            memory.put(entry.clone()).await?;
        }
        match self.disk.put(entry).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Overwrites the expiry of an existing entry. Returns whether any tier held it.
    pub async fn set_expiry(&self, key: &CacheKey, expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let mut found = false;
        if let Some(ref memory) = self.memory {
            found |= memory.set_expiry(key, expires_at).await?;
        }
        found |= self.disk.set_expiry(key, expires_at).await?;
        Ok(found)
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut found = false;
        if let Some(ref memory) = self.memory {
            found |= memory.remove(key).await?;
        }
        found |= self.disk.remove(key).await?;
        Ok(found)
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        if let Some(ref memory) = self.memory {
            memory.clear().await?;
        }
        self.disk.clear().await
    }

    /// Number of entries in the authoritative tier.
    pub async fn len(&self) -> usize {
        match self.memory {
            Some(ref memory) if self.disk.name() == "null" => memory.len().await,
            _ => self.disk.len().await,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bytes currently held by the disk tier.
    pub async fn disk_usage(&self) -> u64 {
        self.disk.usage().await
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn lookup(&self, key: &CacheKey) -> Result<Option<(CacheEntry, Tier)>, CacheError> {
        if let Some(ref memory) = self.memory {
            if let Some(entry) = memory.get(key).await? {
                return Ok(Some((entry, Tier::Memory)));
            }
        }
        Ok(self.disk.get(key).await?.map(|e| (e, Tier::Disk)))
    }

    async fn promote(&self, entry: &CacheEntry) {
        if let Some(ref memory) = self.memory {
            if let Err(e) = memory.put(entry.clone()).await {
                warn!(key = entry.key.short(), error = %e, "memory tier promotion failed");
            } else {
                debug!(key = entry.key.short(), "promoted disk entry to memory tier");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Memory,
    Disk,
}
