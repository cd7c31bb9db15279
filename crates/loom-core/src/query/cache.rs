//! In-memory search response cache with TTL and LRU eviction.
//!
//! Keys carry the repository's index epoch, so a finished index run makes
//! every older entry for that repository unreachable; those age out through
//! TTL and capacity eviction.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::errors::LoomResult;
use crate::models::SearchResponse;

struct CacheEntry {
    value: SearchResponse,
    expires_at: Instant,
}

/// Whether a lookup was served from cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

pub struct SearchCache {
    max_entries: usize,
    ttl: Duration,
    cache: Mutex<IndexMap<String, CacheEntry>>,
}

impl SearchCache {
    pub fn new(max_entries: usize, ttl_seconds: f64) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs_f64(ttl_seconds.max(0.1)),
            cache: Mutex::new(IndexMap::new()),
        }
    }

    pub fn cache_key(repository_id: i64, epoch: i64, limit: i64, query: &str) -> String {
        format!("{repository_id}:{epoch}:{limit}:{query}")
    }

    fn evict_expired(cache: &mut IndexMap<String, CacheEntry>, now: Instant) {
        cache.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_over_capacity(&self, cache: &mut IndexMap<String, CacheEntry>) {
        while cache.len() > self.max_entries {
            cache.shift_remove_index(0);
        }
    }

    /// Return the cached response for `key` or compute, store and return it.
    /// Errors from `compute` are not cached.
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> LoomResult<(SearchResponse, CacheOutcome)>
    where
        F: FnOnce() -> LoomResult<SearchResponse>,
    {
        {
            let mut cache = self.cache.lock();
            Self::evict_expired(&mut cache, Instant::now());
            if let Some(entry) = cache.shift_remove(key) {
                let value = entry.value.clone();
                // Re-insert at the back for LRU order.
                cache.insert(key.to_string(), entry);
                return Ok((value, CacheOutcome::Hit));
            }
        }

        let value = compute()?;
        let mut cache = self.cache.lock();
        cache.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.evict_over_capacity(&mut cache);
        Ok((value, CacheOutcome::Miss))
    }

    /// Drop every entry belonging to `repository_id`.
    pub fn invalidate_repository(&self, repository_id: i64) {
        let prefix = format!("{repository_id}:");
        self.cache.lock().retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
