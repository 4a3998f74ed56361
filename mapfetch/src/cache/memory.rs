//! In-memory tile cache backed by moka.
//!
//! This is the first tier of the lookup waterfall, so reads must be cheap and
//! callable from the render loop without awaiting. It uses
//! `moka::sync::Cache`, whose reads are lock-free.
//!
//! Entries are only removed by an explicit clear unless a maximum entry count
//! is configured, in which case moka evicts least recently used tiles.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;

use crate::cache::types::CacheEntry;
use crate::coord::TileKey;

/// Hit/miss counters for the memory tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

/// In-memory cache of decoded tiles keyed by [`TileKey`].
pub struct MemoryCache {
    cache: Cache<TileKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates an unbounded memory cache.
    pub fn new() -> Self {
        Self::with_max_entries(None)
    }

    /// Creates a memory cache, optionally capped to `max_entries` tiles.
    pub fn with_max_entries(max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder();
        if let Some(max) = max_entries {
            builder = builder.max_capacity(max);
        }

        Self {
            cache: builder.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a tile.
    pub fn get(&self, key: &TileKey) -> Option<CacheEntry> {
        match self.cache.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a tile, replacing any previous entry for the key.
    pub fn insert(&self, key: TileKey, entry: CacheEntry) {
        self.cache.insert(key, entry);
    }

    /// Stores a tile only if the key is not cached yet.
    ///
    /// Returns true if the entry was inserted.
    pub fn insert_if_absent(&self, key: TileKey, entry: CacheEntry) -> bool {
        self.cache.entry(key).or_insert(entry).is_fresh()
    }

    /// Checks for a key without touching the hit/miss counters.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Removes one tile.
    pub fn remove(&self, key: &TileKey) {
        self.cache.invalidate(key);
    }

    /// Removes every tile of a tileset.
    pub fn clear_tileset(&self, tileset: &str) {
        let doomed: Vec<TileKey> = self
            .cache
            .iter()
            .filter(|(key, _)| key.tileset() == tileset)
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in doomed {
            self.cache.invalidate(&key);
        }
        self.cache.run_pending_tasks();
    }

    /// Removes every tile.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Number of cached tiles.
    ///
    /// moka updates this lazily; pending maintenance is flushed first.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entry_count(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}
