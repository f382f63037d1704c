//! # State Cache
//!
//! Memoizes block-scoped reads from the [`StateSource`] with a bounded LRU.
//!
//! ## Design
//!
//! Every entry is keyed by the query kind, the block height and the query
//! parameters, so the same logical question asked at two heights never
//! collides. The cached value is the *fetch itself* (a shared future), not
//! only its result: callers that ask for the same key while the first
//! fetch is still in flight await that one fetch instead of issuing their own.
//!
//! State at a given height never changes, so nothing is invalidated. The only
//! way an entry leaves is eviction:
//!
//! | Event | Effect |
//! |-------|--------|
//! | Capacity exceeded | Least recently used entry dropped |
//! | Fetch failed | Entry dropped so a retry re-issues the read |
//! | Evicted key requested again | Transparent re-fetch |
//!
//! ## Example
//!
//! ```rust,ignore
//! let cache = StateCache::new(source, 10_000);
//!
//! let keeper = cache.upkeep_target(block, 42).await?;
//! let strategies = cache.strategies(block, keeper).await?;
//! ```

use crate::config::DEFAULT_MAX_STRATEGIES;
use crate::error::SourceError;
use crate::source::{SourceResult, StateSource};
use alloy_primitives::Address;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A logical query pinned to a block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Upkeep id to keeper address.
    UpkeepTarget {
        /// Block height the read is scoped to
        block: u64,
        /// Registry-assigned upkeep id
        upkeep_id: u64,
    },
    /// Length of a keeper's strategy array.
    StrategyCount {
        /// Block height the read is scoped to
        block: u64,
        /// Keeper contract
        keeper: Address,
    },
    /// One element of a keeper's strategy array.
    StrategyAt {
        /// Block height the read is scoped to
        block: u64,
        /// Keeper contract
        keeper: Address,
        /// Array index
        index: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachedValue {
    Address(Address),
    Count(u64),
}

impl CachedValue {
    fn into_address(self) -> SourceResult<Address> {
        match self {
            Self::Address(address) => Ok(address),
            Self::Count(_) => Err(SourceError::Decode("expected address slot".to_string())),
        }
    }

    fn into_count(self) -> SourceResult<u64> {
        match self {
            Self::Count(count) => Ok(count),
            Self::Address(_) => Err(SourceError::Decode("expected count slot".to_string())),
        }
    }
}

type PendingFetch = Shared<BoxFuture<'static, SourceResult<CachedValue>>>;

struct Slot {
    /// Distinguishes a re-inserted key from the slot a waiter observed.
    generation: u64,
    fetch: PendingFetch,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by an existing (resolved or in-flight) entry.
    pub hits: u64,
    /// Lookups that started an upstream fetch.
    pub misses: u64,
    /// Entries dropped for capacity.
    pub evictions: u64,
    /// Entries currently held.
    pub entries: usize,
}

/// Read-through LRU cache with in-flight de-duplication.
///
/// # Thread Safety
///
/// `StateCache` is `Send + Sync`. The internal lock is only held while the
/// LRU is touched, never across an upstream await.
pub struct StateCache {
    source: Arc<dyn StateSource>,
    entries: Mutex<LruCache<CacheKey, Slot>>,
    max_strategies: u64,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StateCache {
    /// Creates a cache in front of `source` holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(source: Arc<dyn StateSource>, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be at least 1");
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            entries: Mutex::new(LruCache::new(capacity)),
            max_strategies: DEFAULT_MAX_STRATEGIES,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Sets the largest strategy array length [`strategies`](Self::strategies) accepts.
    #[must_use]
    pub const fn with_max_strategies(mut self, limit: u64) -> Self {
        self.max_strategies = limit;
        self
    }

    /// Returns the underlying source, for reads that must bypass the cache.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn StateSource> {
        &self.source
    }

    /// Keeper address behind `upkeep_id` as of `block`.
    pub async fn upkeep_target(&self, block: u64, upkeep_id: u64) -> SourceResult<Address> {
        self.get(CacheKey::UpkeepTarget { block, upkeep_id })
            .await?
            .into_address()
    }

    /// Strategy array length of `keeper` as of `block`.
    pub async fn strategy_count(&self, block: u64, keeper: Address) -> SourceResult<u64> {
        self.get(CacheKey::StrategyCount { block, keeper })
            .await?
            .into_count()
    }

    /// Strategy at `index` of `keeper` as of `block`.
    pub async fn strategy_at(&self, block: u64, keeper: Address, index: u64) -> SourceResult<Address> {
        self.get(CacheKey::StrategyAt { block, keeper, index })
            .await?
            .into_address()
    }

    /// Every strategy of `keeper` as of `block`, in array order.
    ///
    /// Reads the length first, then all elements concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] without reading any element if the
    /// length exceeds the configured strategy limit.
    pub async fn strategies(&self, block: u64, keeper: Address) -> SourceResult<Vec<Address>> {
        let count = self.strategy_count(block, keeper).await?;
        if count > self.max_strategies {
            return Err(SourceError::Decode(format!(
                "strategy count {count} of {keeper} exceeds limit {}",
                self.max_strategies
            )));
        }
        try_join_all((0..count).map(|index| self.strategy_at(block, keeper, index))).await
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Returns true if `key` currently has an entry, without touching recency.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains(key)
    }

    async fn get(&self, key: CacheKey) -> SourceResult<CachedValue> {
        let (fetch, generation) = self.lookup_or_start(key);

        let result = fetch.await;
        if result.is_err() {
            let mut entries = self.entries.lock();
            if entries
                .peek(&key)
                .is_some_and(|slot| slot.generation == generation)
            {
                entries.pop(&key);
                debug!(?key, "dropped failed fetch from cache");
            }
        }
        result
    }

    fn lookup_or_start(&self, key: CacheKey) -> (PendingFetch, u64) {
        let mut entries = self.entries.lock();

        if let Some(slot) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (slot.fetch.clone(), slot.generation);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let fetch = self.start_fetch(key);

        if let Some((evicted, _)) = entries.push(
            key,
            Slot {
                generation,
                fetch: fetch.clone(),
            },
        ) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(?evicted, "evicted least recently used entry");
        }

        (fetch, generation)
    }

    fn start_fetch(&self, key: CacheKey) -> PendingFetch {
        let source = Arc::clone(&self.source);
        debug!(?key, "cache miss, fetching");

        async move {
            match key {
                CacheKey::UpkeepTarget { block, upkeep_id } => source
                    .upkeep_target(block, upkeep_id)
                    .await
                    .map(CachedValue::Address),
                CacheKey::StrategyCount { block, keeper } => source
                    .strategy_count(block, keeper)
                    .await
                    .map(CachedValue::Count),
                CacheKey::StrategyAt {
                    block,
                    keeper,
                    index,
                } => source
                    .strategy_at(block, keeper, index)
                    .await
                    .map(CachedValue::Address),
            }
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for StateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCache")
            .field("stats", &self.stats())
            .field("capacity", &self.capacity())
            .field("max_strategies", &self.max_strategies)
            .finish_non_exhaustive()
    }
}
