//! Response cache: a two-tier byte store keyed by request identity.
//!
//! # Response Caching Module
//!
//! Entries carry an expiry timestamp. Normal reads ([`CacheStore::get`]) treat
//! expired entries as absent, while the forced read
//! ([`CacheStore::get_forced`]) returns them anyway so a failed network call
//! can fall back to stale data. Expired entries stay on disk until capacity
//! pressure evicts them.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | Expiry-aware front over the memory and disk tiers |
//! | [`CacheConfig`] | Capacities, directory, key headers |
//! | [`CacheBackend`] | Trait for storage tiers |
//! | [`DiskCache`] | Persistent tier bounded by bytes (default 150 MiB) |
//! | [`MemoryCache`] | LRU tier bounded by bytes (default 0, disabled) |
//! | [`NullCache`] | No-op tier |
//! | [`CacheKey`] | Key derived from method, URL and selected headers |
//!
//! ## Example
//!
//! ```rust,no_run
//! use cachelane::cache::{CacheConfig, CacheStore};
//!
//! # async fn demo() -> Result<(), cachelane::cache::CacheError> {
//! let store = CacheStore::open(
//!     CacheConfig::new()
//!         .with_directory("/tmp/cachelane-demo")
//!         .with_memory_capacity(8 * 1024 * 1024),
//! )
//! .await?;
//! # Ok(()) }
//! ```

mod backend;
mod disk;
mod key;
mod store;

pub use backend::{CacheBackend, CacheEntry, CacheError, MemoryCache, NullCache, ResponseMetadata};
pub use disk::DiskCache;
pub use key::{CacheKey, CacheKeyGenerator, DEFAULT_KEY_HEADERS};
pub use store::{CacheConfig, CacheStats, CacheStore, DEFAULT_DISK_CAPACITY, DEFAULT_MEMORY_CAPACITY};
