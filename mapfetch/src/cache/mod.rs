//! Two-tier tile cache.
//!
//! - [`MemoryCache`]: in-process, consulted first, never blocks.
//! - [`FileCache`]: durable, one folder per tileset, write-behind through
//!   [`FileCacheDaemon`].
//! - [`CacheManager`]: the façade the fetcher talks to.
//!
//! # Example
//!
//! ```ignore
//! use mapfetch::cache::{CacheManager, FileCache, FileCacheConfig, MemoryCache};
//!
//! let (disk, daemon) = FileCache::new(FileCacheConfig::default())?;
//! tokio::spawn(daemon.run(shutdown.clone()));
//!
//! let manager = CacheManager::new(Arc::new(MemoryCache::new()), disk);
//! if let Some(entry) = manager.get_texture_item_from_memory("mapbox.satellite", &tile) {
//!     // draw it
//! }
//! ```

mod disk;
mod manager;
mod memory;
mod naming;
mod types;

pub use disk::{
    FileCache, FileCacheConfig, FileCacheDaemon, FileCacheEvent, LoadCallback,
    CACHE_ROOT_FOLDER_NAME, DEFAULT_FILE_EXTENSION, DEFAULT_TICK_INTERVAL,
};
pub use manager::CacheManager;
pub use memory::{MemoryCache, MemoryCacheStats};
pub use naming::{sanitize_folder_name, CacheLayout, METADATA_EXTENSION};
pub use types::{CacheEntry, CacheError, ClearResult, TileMetadata};
