//! Page Cache (C3): a bounded FIFO store of rendered bytes, keyed by canonical request
//! fingerprint, with per-entry timestamps and an optional hard TTL independent of ISR's
//! revalidate clock.
//!
//! Backed by an in-process [`DashMap`] by default, or an external [`Storage`] when this
//! deployment runs multiple processes. Either way, `Put` replaces the whole entry in one
//! atomic swap — `DashMap::insert` never exposes a torn value to a concurrent `Get`, and
//! the external-storage path writes the pre-encoded byte string in one `put` call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::signals::{self, Signal};
use crate::storage::{self, Storage};

/// A cached, rendered page body together with the time it was produced.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub html: Bytes,
    pub created_at: SystemTime,
}

impl CacheEntry {
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed().unwrap_or_default()
    }
}

/// Bounded FIFO cache of rendered page bytes (C3).
pub struct PageCache {
    config: CacheConfig,
    storage: Option<Arc<dyn Storage>>,
    entries: DashMap<String, CacheEntry>,
    order: Mutex<VecDeque<String>>,
    key_prefix: &'static str,
}

impl PageCache {
    /// Creates an in-process page cache (`page:` keyspace).
    pub fn new(config: CacheConfig) -> Self {
        Self::with_prefix(config, None, "page:")
    }

    /// Creates a page cache backed by an external byte store for multi-process deployments.
    pub fn with_storage(config: CacheConfig, storage: Arc<dyn Storage>) -> Self {
        Self::with_prefix(config, Some(storage), "page:")
    }

    fn with_prefix(
        config: CacheConfig,
        storage: Option<Arc<dyn Storage>>,
        key_prefix: &'static str,
    ) -> Self {
        Self {
            config,
            storage,
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            key_prefix,
        }
    }

    fn storage_key(&self, fp: &str) -> String {
        format!("{}{}", self.key_prefix, fp)
    }

    /// Looks up a fingerprint, returning `None` on a miss or an expired (TTL'd) entry.
    pub async fn get(&self, fp: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry = if let Some(storage) = &self.storage {
            match storage.get(&self.storage_key(fp)).await? {
                Some(bytes) => {
                    let (created_at, html) = storage::decode_entry(&bytes)?;
                    Some(CacheEntry { html, created_at })
                }
                None => None,
            }
        } else {
            self.entries.get(fp).map(|e| e.clone())
        };

        let Some(entry) = entry else {
            signals::app_signals()
                .emit(Signal::new(ids::CACHE_MISS))
                .await;
            return Ok(None);
        };

        if let Some(ttl) = self.config.ttl() {
            if entry.age() >= ttl {
                self.evict(fp).await?;
                signals::app_signals()
                    .emit(Signal::new(ids::CACHE_MISS))
                    .await;
                return Ok(None);
            }
        }

        signals::app_signals()
            .emit(Signal::new(ids::CACHE_HIT))
            .await;
        Ok(Some(entry))
    }

    /// Stores (or atomically replaces) the entry for a fingerprint.
    pub async fn put(&self, fp: &str, html: Bytes) -> Result<(), CacheError> {
        let created_at = SystemTime::now();

        if let Some(storage) = &self.storage {
            let encoded = storage::encode_entry(created_at, &html);
            storage.put(&self.storage_key(fp), encoded).await?;
        } else {
            let is_new = !self.entries.contains_key(fp);
            self.entries.insert(fp.to_string(), CacheEntry { html, created_at });
            if is_new {
                self.evict_if_over_capacity(fp);
            }
        }

        signals::app_signals().emit(Signal::new(ids::CACHE_PUT)).await;
        Ok(())
    }

    async fn evict(&self, fp: &str) -> Result<(), CacheError> {
        if let Some(storage) = &self.storage {
            storage.delete(&self.storage_key(fp)).await?;
        } else {
            self.entries.remove(fp);
        }
        Ok(())
    }

    /// FIFO eviction: when `max_entries >= 0` and the in-memory map is over capacity,
    /// evict the oldest keys until back within budget. `-1` disables eviction entirely.
    fn evict_if_over_capacity(&self, newly_inserted: &str) {
        if self.config.max_entries < 0 {
            return;
        }
        let max_entries = self.config.max_entries as usize;
        let mut order = self.order.lock();
        order.push_back(newly_inserted.to_string());

        while self.entries.len() > max_entries {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Current number of entries held (in-process mode only; always 0 for external storage).
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shell cache (PPR only, C3's sibling keyspace): `{shell: bytes}` containing
/// `<!--slot:NAME-->` placeholders. No TTL by default — shells are cached indefinitely
/// per §9's open question, resolved in DESIGN.md.
pub struct ShellCache {
    inner: PageCache,
}

impl ShellCache {
    pub fn new() -> Self {
        Self {
            inner: PageCache::with_prefix(
                CacheConfig {
                    max_entries: -1,
                    ttl_seconds: None,
                },
                None,
                "shell:",
            ),
        }
    }

    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: PageCache::with_prefix(
                CacheConfig {
                    max_entries: -1,
                    ttl_seconds: None,
                },
                Some(storage),
                "shell:",
            ),
        }
    }

    pub async fn get(&self, fp: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.inner.get(fp).await?.map(|e| e.html))
    }

    pub async fn put(&self, fp: &str, shell: Bytes) -> Result<(), CacheError> {
        self.inner.put(fp, shell).await
    }
}

impl Default for ShellCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known signal ids emitted by the Page Cache, for observability hooks (A1).
pub mod ids {
    pub const CACHE_HIT: &str = "cache.hit";
    pub const CACHE_MISS: &str = "cache.miss";
    pub const CACHE_PUT: &str = "cache.put";
    pub const CACHE_EVICT: &str = "cache.evict";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_then_hit_after_put() {
        let cache = PageCache::new(CacheConfig::default());
        assert!(cache.get("/a").await.unwrap().is_none());
        cache.put("/a", Bytes::from_static(b"hello")).await.unwrap();
        let entry = cache.get("/a").await.unwrap().unwrap();
        assert_eq!(&entry.html[..], b"hello");
    }

    #[tokio::test]
    async fn fifo_eviction_at_exact_capacity() {
        let cache = PageCache::new(CacheConfig {
            max_entries: 2,
            ttl_seconds: None,
        });
        cache.put("/a", Bytes::from_static(b"a")).await.unwrap();
        cache.put("/b", Bytes::from_static(b"b")).await.unwrap();
        cache.put("/c", Bytes::from_static(b"c")).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("/a").await.unwrap().is_none());
        assert!(cache.get("/b").await.unwrap().is_some());
        assert!(cache.get("/c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn negative_max_entries_disables_eviction() {
        let cache = PageCache::new(CacheConfig {
            max_entries: -1,
            ttl_seconds: None,
        });
        for i in 0..10 {
            cache
                .put(&format!("/{i}"), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 10);
    }

    #[tokio::test]
    async fn ttl_expiry_is_a_hard_delete() {
        let cache = PageCache::new(CacheConfig {
            max_entries: 500,
            ttl_seconds: Some(0),
        });
        cache.put("/a", Bytes::from_static(b"x")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(cache.get("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replacing_an_existing_key_does_not_grow_the_fifo() {
        let cache = PageCache::new(CacheConfig {
            max_entries: 1,
            ttl_seconds: None,
        });
        cache.put("/a", Bytes::from_static(b"1")).await.unwrap();
        cache.put("/a", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(&cache.get("/a").await.unwrap().unwrap().html[..], b"2");
    }
}
