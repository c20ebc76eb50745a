//! On-disk cache tier.
//!
//! Each entry is two files named by the key hash: `<hash>.body` holds the raw
//! payload and `<hash>.meta.json` the metadata and timestamps. The index of
//! what is on disk lives in memory and is rebuilt from the metadata files when
//! the tier is opened.
//!
//! Payload reads and writes run without the index lock. A write lands in
//! uniquely named temp files first; only the renames that publish it and the
//! index update happen under the lock.

use super::backend::{CacheBackend, CacheEntry, CacheError, ResponseMetadata};
use super::key::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const BODY_EXT: &str = "body";
const META_EXT: &str = "meta.json";
const TMP_EXT: &str = "tmp";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskMeta {
    key: CacheKey,
    metadata: ResponseMetadata,
    expires_at: DateTime<Utc>,
    inserted_at: DateTime<Utc>,
    size: u64,
}

#[derive(Debug)]
struct Slot {
    meta: DiskMeta,
    /// Monotonic access stamp for least-recently-used eviction.
    touched: u64,
    /// Stamp of the write that produced this slot.
    generation: u64,
}

#[derive(Debug, Default)]
struct Index {
    slots: HashMap<CacheKey, Slot>,
    used: u64,
    clock: u64,
    evictions: u64,
}

impl Index {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, meta: DiskMeta) {
        let stamp = self.tick();
        self.used += meta.size;
        let slot = Slot { meta, touched: stamp, generation: stamp };
        if let Some(old) = self.slots.insert(slot.meta.key.clone(), slot) {
            self.used -= old.meta.size;
        }
    }

    fn take(&mut self, key: &CacheKey) -> Option<DiskMeta> {
        let slot = self.slots.remove(key)?;
        self.used -= slot.meta.size;
        Some(slot.meta)
    }

    fn oldest(&self) -> Option<CacheKey> {
        self.slots.iter().min_by_key(|(_, s)| s.touched).map(|(k, _)| k.clone())
    }
}

/// Disk tier bounded by total payload bytes.
pub struct DiskCache {
    dir: PathBuf,
    capacity: u64,
    index: Mutex<Index>,
}

impl DiskCache {
    /// Opens (creating if needed) a cache directory and indexes what it holds.
    ///
    /// Unreadable metadata, bodies without metadata and leftover temp files
    /// are removed. If the directory holds more than `capacity_bytes`, the
    /// oldest entries are evicted.
    pub async fn open(dir: impl Into<PathBuf>, capacity_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut metas: Vec<PathBuf> = Vec::new();
        let mut bodies: Vec<(String, PathBuf)> = Vec::new();
        let mut rd = fs::read_dir(&dir).await?;
        while let Some(dent) = rd.next_entry().await? {
            let path = dent.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if name.ends_with(TMP_EXT) {
                debug!(path = %path.display(), "removing interrupted cache write");
                let _ = fs::remove_file(&path).await;
            } else if name.ends_with(META_EXT) {
                metas.push(path);
            } else if let Some(stem) = name.strip_suffix(BODY_EXT).and_then(|n| n.strip_suffix('.')) {
                bodies.push((stem.to_string(), path));
            }
        }

        let mut found: Vec<DiskMeta> = Vec::new();
        for path in metas {
            match Self::read_meta(&path).await {
                Ok(meta) => {
                    if fs::metadata(Self::body_path_in(&dir, &meta.key)).await.is_ok() {
                        found.push(meta);
                    } else {
                        debug!(key = meta.key.short(), "dropping cache metadata without body");
                        let _ = fs::remove_file(&path).await;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping unreadable cache metadata");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        let indexed: HashSet<&str> = found.iter().map(|m| m.key.as_str()).collect();
        for (stem, path) in &bodies {
            if !indexed.contains(stem.as_str()) {
                debug!(path = %path.display(), "removing cache body without metadata");
                let _ = fs::remove_file(path).await;
            }
        }

        // Oldest first, so the access clock reflects insertion order.
        found.sort_by_key(|m| m.inserted_at);
        let cache = Self { dir, capacity: capacity_bytes, index: Mutex::new(Index::default()) };
        {
            let mut index = cache.index.lock().await;
            for meta in found {
                index.insert(meta);
            }
            cache.evict_until_fits(&mut index, 0).await;
            debug!(dir = %cache.dir.display(), entries = index.slots.len(), bytes = index.used, "disk cache opened");
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn evictions(&self) -> u64 {
        self.index.lock().await.evictions
    }

    fn body_path_in(dir: &Path, key: &CacheKey) -> PathBuf {
        dir.join(format!("{}.{}", key.as_str(), BODY_EXT))
    }

    fn body_path(&self, key: &CacheKey) -> PathBuf {
        Self::body_path_in(&self.dir, key)
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.as_str(), META_EXT))
    }

    /// A temp file name no other writer in this or another process will pick.
    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{}.{}.{}.{}", key.as_str(), std::process::id(), seq, TMP_EXT))
    }

    async fn read_meta(path: &Path) -> Result<DiskMeta, CacheError> {
        let raw = fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_tmp(&self, key: &CacheKey, data: &[u8]) -> Result<PathBuf, CacheError> {
        let tmp = self.tmp_path(key);
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(tmp)
    }

    async fn discard(paths: &[&Path]) {
        for path in paths {
            let _ = fs::remove_file(path).await;
        }
    }

    async fn remove_files(&self, key: &CacheKey) {
        for path in [self.body_path(key), self.meta_path(key)] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove cache file");
                }
            }
        }
    }

    async fn evict_until_fits(&self, index: &mut Index, incoming: u64) {
        while index.used + incoming > self.capacity {
            let Some(victim) = index.oldest() else { break };
            index.take(&victim);
            index.evictions += 1;
            self.remove_files(&victim).await;
            debug!(key = victim.short(), "evicted cache entry under capacity pressure");
        }
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let (meta, generation) = {
            let mut index = self.index.lock().await;
            let stamp = index.tick();
            match index.slots.get_mut(key) {
                Some(slot) => {
                    slot.touched = stamp;
                    (slot.meta.clone(), slot.generation)
                }
                None => return Ok(None),
            }
        };
        match fs::read(self.body_path(key)).await {
            Ok(body) => Ok(Some(CacheEntry {
                key: meta.key,
                payload: Bytes::from(body),
                metadata: meta.metadata,
                expires_at: meta.expires_at,
                inserted_at: meta.inserted_at,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Deleted behind our back, unless a newer write has replaced it since.
                let mut index = self.index.lock().await;
                if index.slots.get(key).is_some_and(|slot| slot.generation == generation) {
                    index.take(key);
                    let _ = fs::remove_file(self.meta_path(key)).await;
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `entry`, replacing any previous entry only once the new files
    /// are fully written. An entry larger than the whole tier is skipped and
    /// the previous one dropped, as the memory tier does.
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let size = entry.size();
        if size > self.capacity {
            let mut index = self.index.lock().await;
            if index.take(&entry.key).is_some() {
                self.remove_files(&entry.key).await;
            }
            debug!(key = entry.key.short(), size, capacity = self.capacity, "entry larger than disk capacity, not stored");
            return Ok(());
        }

        let meta = DiskMeta {
            key: entry.key.clone(),
            metadata: entry.metadata,
            expires_at: entry.expires_at,
            inserted_at: entry.inserted_at,
            size,
        };
        let raw_meta = serde_json::to_vec(&meta)?;
        let body_tmp = self.write_tmp(&entry.key, &entry.payload).await?;
        let meta_tmp = match self.write_tmp(&entry.key, &raw_meta).await {
            Ok(tmp) => tmp,
            Err(e) => {
                Self::discard(&[&body_tmp]).await;
                return Err(e);
            }
        };

        let mut index = self.index.lock().await;
        index.take(&entry.key);
        self.evict_until_fits(&mut index, size).await;
        if let Err(e) = fs::rename(&body_tmp, self.body_path(&entry.key)).await {
            Self::discard(&[&body_tmp, &meta_tmp]).await;
            self.remove_files(&entry.key).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&meta_tmp, self.meta_path(&entry.key)).await {
            Self::discard(&[&meta_tmp]).await;
            self.remove_files(&entry.key).await;
            return Err(e.into());
        }
        index.insert(meta);
        Ok(())
    }

    async fn set_expiry(&self, key: &CacheKey, expires_at: DateTime<Utc>) -> Result<bool, CacheError> {
        let mut index = self.index.lock().await;
        let Some(slot) = index.slots.get_mut(key) else { return Ok(false) };
        slot.meta.expires_at = expires_at;
        let raw = serde_json::to_vec(&slot.meta)?;
        let tmp = self.write_tmp(key, &raw).await?;
        if let Err(e) = fs::rename(&tmp, self.meta_path(key)).await {
            Self::discard(&[&tmp]).await;
            return Err(e.into());
        }
        Ok(true)
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut index = self.index.lock().await;
        if index.take(key).is_none() {
            return Ok(false);
        }
        self.remove_files(key).await;
        Ok(true)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock().await;
        let keys: Vec<CacheKey> = index.slots.keys().cloned().collect();
        for key in keys {
            index.take(&key);
            self.remove_files(&key).await;
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.index.lock().await.slots.len()
    }

    async fn usage(&self) -> u64 {
        self.index.lock().await.used
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}
