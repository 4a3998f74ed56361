//! Façade over the memory and disk tiers.

use std::sync::Arc;

use tracing::trace;

use crate::cache::disk::FileCache;
use crate::cache::memory::MemoryCache;
use crate::cache::types::{CacheEntry, CacheError, ClearResult};
use crate::coord::{CanonicalTileId, TileKey};

/// Unified memory + disk cache access for the fetcher.
#[derive(Clone)]
pub struct CacheManager {
    memory: Arc<MemoryCache>,
    disk: FileCache,
}

impl CacheManager {
    pub fn new(memory: Arc<MemoryCache>, disk: FileCache) -> Self {
        Self { memory, disk }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> &FileCache {
        &self.disk
    }

    /// Memory-tier lookup. Never touches the disk.
    pub fn get_texture_item_from_memory(
        &self,
        tileset: &str,
        tile: &CanonicalTileId,
    ) -> Option<CacheEntry> {
        self.memory.get(&TileKey::new(tileset, *tile))
    }

    /// Whether the disk tier holds a file for the tile.
    pub fn texture_file_exists(&self, tileset: &str, tile: &CanonicalTileId) -> bool {
        self.disk.exists(tileset, tile)
    }

    /// Loads a tile from disk in the background.
    ///
    /// A successfully loaded entry that has not expired is promoted into the
    /// memory tier before `callback` runs. Expired entries are handed to the
    /// callback only, so the next lookup goes back to disk until a
    /// revalidation stores a fresh copy. Returns false if there is no file
    /// to load.
    pub fn get_texture_item_from_file<F>(
        &self,
        tileset: &str,
        tile: &CanonicalTileId,
        callback: F,
    ) -> bool
    where
        F: FnOnce(Result<CacheEntry, CacheError>) + Send + 'static,
    {
        let memory = Arc::clone(&self.memory);
        let key = TileKey::new(tileset, *tile);
        self.disk.get_async(tileset, tile, move |result| {
            match &result {
                Ok(entry) if entry.is_expired() => {
                    trace!(key = %key, "Expired disk tile not promoted");
                }
                Ok(entry) => {
                    trace!(key = %key, "Promoting disk tile to memory");
                    memory.insert(key, entry.clone());
                }
                Err(_) => {}
            }
            callback(result);
        })
    }

    /// Stores a tile in both tiers.
    ///
    /// The memory tier is overwritten when `force_insert` is set, otherwise
    /// only filled if empty. The disk write is queued with the same flag.
    pub fn add_texture_item(
        &self,
        tileset: &str,
        tile: &CanonicalTileId,
        entry: CacheEntry,
        force_insert: bool,
    ) {
        let key = TileKey::new(tileset, *tile);
        if force_insert {
            self.memory.insert(key, entry.clone());
        } else {
            self.memory.insert_if_absent(key, entry.clone());
        }
        self.disk.add(tileset, tile, entry, force_insert);
    }

    /// Empties the memory tier.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Forgets a tileset in memory and in the disk index. Files are kept.
    pub fn clear(&self, tileset: &str) {
        self.memory.clear_tileset(tileset);
        self.disk.clear(tileset);
    }

    /// Forgets a tileset everywhere and deletes its files.
    pub fn purge(&self, tileset: &str) -> Result<ClearResult, CacheError> {
        self.memory.clear_tileset(tileset);
        self.disk.clear_tileset_files(tileset)
    }
}
