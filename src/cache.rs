//! Result cache keyed by normalized query text.
//!
//! Backed by a `moka` future cache with LRU eviction and a fixed TTL.
//! Concurrent lookups of the same key share one computation
//! (`try_get_with`), and failed computations are never stored.
//!
//! A cache belongs to exactly one taxonomy snapshot. Reload builds a new
//! snapshot with a fresh cache, so entries never outlive the taxonomy they
//! were ranked against.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hs_match_core::error::MatchError;
use hs_match_core::models::MatchCandidate;

use crate::config::CacheConfig;

/// A ranked result as stored in the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub candidates: Arc<Vec<MatchCandidate>>,
    pub created_at: DateTime<Utc>,
}

/// Counter snapshot returned by [`ResultCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub entries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

pub struct ResultCache {
    inner: Option<Cache<String, Arc<CacheEntry>>>,
    counters: Counters,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::with_limits(
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_seconds),
        )
    }

    pub fn with_limits(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            inner: Some(cache),
            counters: Counters::default(),
        }
    }

    /// A cache that stores nothing; every lookup runs `compute`.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Return the entry for `key`, running `compute` on a miss.
    ///
    /// Callers racing on the same key wait for the first caller's
    /// computation. An `Err` from `compute` is handed to every waiter and
    /// leaves the key absent.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<Arc<CacheEntry>, MatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<MatchCandidate>, MatchError>>,
    {
        let computed = AtomicBool::new(false);
        let init = async {
            computed.store(true, Ordering::Relaxed);
            self.counters.computations.fetch_add(1, Ordering::Relaxed);
            let candidates = compute().await?;
            Ok::<_, MatchError>(Arc::new(CacheEntry {
                candidates: Arc::new(candidates),
                created_at: Utc::now(),
            }))
        };

        let result = match &self.inner {
            Some(cache) => cache
                .try_get_with(key.to_string(), init)
                .await
                .map_err(|e| (*e).clone()),
            None => init.await,
        };

        if computed.load(Ordering::Relaxed) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .as_ref()
            .map(|c| c.contains_key(key))
            .unwrap_or(false)
    }

    /// Apply pending evictions and return the live entry count.
    pub async fn entry_count(&self) -> u64 {
        match &self.inner {
            Some(cache) => {
                cache.run_pending_tasks().await;
                cache.entry_count()
            }
            None => 0,
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            entries: self.entry_count().await,
        }
    }
}
