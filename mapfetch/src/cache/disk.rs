//! Durable tile cache with a queued, write-behind save path.
//!
//! The disk tier is split in two halves, following the daemon pattern used
//! elsewhere in the crate:
//!
//! - [`FileCache`]: cloneable handle used by callers. Lookups, existence
//!   checks, enqueueing writes and issuing async loads.
//! - [`FileCacheDaemon`]: the cooperative loop. Each tick it applies finished
//!   loads and saves, then starts at most one pending write.
//!
//! ```text
//! add() ──► WriteQueue ──tick──► spawn_blocking(write) ──tick──► index + FileSaved
//!            (one live write per key, one write in flight per key)
//!
//! get_async() ──► spawn_blocking(read + decode) ──tick──► callback(entry)
//! ```
//!
//! # Coalescing
//!
//! If a key is added again while its previous write is still queued, the
//! queued write is superseded: when the daemon reaches it, it is dropped
//! without touching the disk. Only the latest entry for a key is written.
//!
//! A key whose write is already running on a worker is not started again
//! until that write has been applied. A later `add` waits in the queue, so
//! the newest entry is always the last one written.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::naming::CacheLayout;
use crate::cache::types::{CacheEntry, CacheError, ClearResult, TileMetadata};
use crate::coord::{CanonicalTileId, TileKey};

/// Default file extension for stored tiles.
pub const DEFAULT_FILE_EXTENSION: &str = "png";

/// Name of the cache folder under the user cache directory.
pub const CACHE_ROOT_FOLDER_NAME: &str = "FileCache";

/// Default interval between daemon ticks (one "frame").
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback invoked when an async load finishes.
pub type LoadCallback = Box<dyn FnOnce(Result<CacheEntry, CacheError>) + Send + 'static>;

/// Notifications produced by the disk tier.
#[derive(Debug, Clone)]
pub enum FileCacheEvent {
    /// A tile was written; `entry.file_path` points at the file.
    FileSaved { key: TileKey, entry: CacheEntry },

    /// A tile could not be written.
    WriteFailed { key: TileKey, error: String },
}

/// Disk cache configuration.
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Root directory; one sub-folder per tileset is created below it.
    pub root: PathBuf,

    /// Image file extension.
    pub extension: String,

    /// Interval between daemon ticks.
    pub tick_interval: Duration,
}

impl FileCacheConfig {
    /// Creates a config rooted at `root` with default extension and tick.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_FILE_EXTENSION.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// `<user cache dir>/mapfetch/FileCache`, or a relative folder if the
    /// platform has no cache directory.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mapfetch")
            .join(CACHE_ROOT_FOLDER_NAME)
    }

    /// Sets the image extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Sets the daemon tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

// =============================================================================
// Write queue
// =============================================================================

struct PendingWrite {
    key: TileKey,
    entry: CacheEntry,
    sequence: u64,
}

/// FIFO of pending writes, the sequence of the live write per key and the
/// keys currently being written.
#[derive(Default)]
struct WriteQueue {
    queue: VecDeque<PendingWrite>,
    live: HashMap<TileKey, u64>,
    writing: HashSet<TileKey>,
    next_sequence: u64,
}

impl WriteQueue {
    /// Queues a write. Returns true if it superseded a queued write.
    fn push(&mut self, key: TileKey, entry: CacheEntry) -> bool {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let superseded = self.live.insert(key.clone(), sequence).is_some();
        self.queue.push_back(PendingWrite {
            key,
            entry,
            sequence,
        });
        superseded
    }

    fn is_live(&self, write: &PendingWrite) -> bool {
        self.live.get(&write.key) == Some(&write.sequence)
    }

    /// Pops the oldest write that can be acted on. `Ok` if it is live and
    /// its key is now marked as writing, `Err` if it was superseded.
    ///
    /// Live writes for a key that is still being written are skipped and
    /// keep their place in the queue.
    fn pop(&mut self) -> Option<Result<PendingWrite, PendingWrite>> {
        let position = self
            .queue
            .iter()
            .position(|w| !self.is_live(w) || !self.writing.contains(&w.key))?;
        let write = self.queue.remove(position)?;
        if self.is_live(&write) {
            self.live.remove(&write.key);
            self.writing.insert(write.key.clone());
            Some(Ok(write))
        } else {
            Some(Err(write))
        }
    }

    /// Marks the write for `key` as applied.
    fn finish(&mut self, key: &TileKey) {
        self.writing.remove(key);
    }

    fn live_count(&self) -> usize {
        self.live.len()
    }
}

// =============================================================================
// Shared state
// =============================================================================

struct LoadCompletion {
    key: TileKey,
    result: Result<CacheEntry, CacheError>,
    callback: LoadCallback,
}

struct Shared {
    layout: CacheLayout,
    index: DashMap<TileKey, CacheEntry>,
    writes: Mutex<WriteQueue>,
    events: broadcast::Sender<FileCacheEvent>,
    loads: mpsc::UnboundedSender<LoadCompletion>,
    runtime: Handle,
}

/// Handle to the disk tier.
#[derive(Clone)]
pub struct FileCache {
    shared: Arc<Shared>,
}

impl FileCache {
    /// Creates the disk cache and its daemon.
    ///
    /// Must be called from within a Tokio runtime; blocking I/O is scheduled
    /// on that runtime. The root directory is created if missing.
    pub fn new(config: FileCacheConfig) -> Result<(Self, FileCacheDaemon), CacheError> {
        let runtime = Handle::try_current()
            .map_err(|e| CacheError::Worker(format!("no Tokio runtime: {}", e)))?;

        fs::create_dir_all(&config.root)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            layout: CacheLayout::new(config.root, &config.extension),
            index: DashMap::new(),
            writes: Mutex::new(WriteQueue::default()),
            events,
            loads: loads_tx,
            runtime,
        });

        let daemon = FileCacheDaemon {
            shared: Arc::clone(&shared),
            loads: loads_rx,
            in_flight: JoinSet::new(),
            tick_interval: config.tick_interval,
        };

        Ok((Self { shared }, daemon))
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        self.shared.layout.root()
    }

    /// Path the image for a tile is (or would be) stored at.
    pub fn tile_path(&self, tileset: &str, tile: &CanonicalTileId) -> PathBuf {
        self.shared.layout.tile_path(tileset, tile)
    }

    /// Subscribes to [`FileCacheEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<FileCacheEvent> {
        self.shared.events.subscribe()
    }

    /// Looks up an entry that has already been saved or loaded.
    ///
    /// This does not touch the disk.
    pub fn get(&self, tileset: &str, tile: &CanonicalTileId) -> Option<CacheEntry> {
        let key = TileKey::new(tileset, *tile);
        self.shared.index.get(&key).map(|e| e.value().clone())
    }

    /// Checks whether the tile's file exists on disk.
    pub fn exists(&self, tileset: &str, tile: &CanonicalTileId) -> bool {
        self.tile_path(tileset, tile).is_file()
    }

    /// Queues an entry to be written.
    ///
    /// A write already queued for the same tile is superseded. The write is
    /// queued whether or not a file exists; `force_insert` only matters to
    /// the memory tier. Entries without data are ignored.
    pub fn add(&self, tileset: &str, tile: &CanonicalTileId, entry: CacheEntry, force_insert: bool) {
        if entry.data.is_empty() {
            trace!(tileset, tile = %tile, "Ignoring empty tile write");
            return;
        }

        let key = TileKey::new(tileset, *tile);
        let superseded = self.shared.writes.lock().push(key.clone(), entry);
        if superseded {
            debug!(key = %key, force_insert, "Tile already queued for saving, superseding queued write");
        }
    }

    /// Number of writes waiting to be started.
    pub fn pending_write_count(&self) -> usize {
        self.shared.writes.lock().live_count()
    }

    /// Loads a tile from disk without blocking the caller.
    ///
    /// If no file exists this does nothing and returns false; the caller
    /// should fall through to the network. Otherwise the file is read and
    /// decoded on a blocking worker and `callback` runs on the next daemon
    /// tick with the loaded entry.
    pub fn get_async<F>(&self, tileset: &str, tile: &CanonicalTileId, callback: F) -> bool
    where
        F: FnOnce(Result<CacheEntry, CacheError>) + Send + 'static,
    {
        let path = self.tile_path(tileset, tile);
        if !path.is_file() {
            return false;
        }

        let key = TileKey::new(tileset, *tile);
        let loads = self.shared.loads.clone();
        self.shared.runtime.spawn_blocking(move || {
            let result = load_tile(&path);
            let _ = loads.send(LoadCompletion {
                key,
                result,
                callback: Box::new(callback),
            });
        });
        true
    }

    /// Drops index entries for a tileset. Files are kept.
    pub fn clear(&self, tileset: &str) {
        self.shared.index.retain(|key, _| key.tileset() != tileset);
    }

    /// Drops every index entry. Files are kept.
    pub fn clear_index(&self) {
        self.shared.index.clear();
    }

    /// Deletes every file stored for a tileset.
    pub fn clear_tileset_files(&self, tileset: &str) -> Result<ClearResult, CacheError> {
        self.clear(tileset);
        clear_folder(&self.shared.layout.tileset_dir(tileset))
    }

    /// Deletes every file in every tileset folder.
    pub fn clear_all(&self) -> Result<ClearResult, CacheError> {
        self.clear_index();
        let mut total = ClearResult::default();
        for dir in tileset_dirs(self.root())? {
            let result = clear_folder(&dir)?;
            total.files_deleted += result.files_deleted;
            total.bytes_freed += result.bytes_freed;
        }
        info!(
            root = %self.root().display(),
            files = total.files_deleted,
            bytes = total.bytes_freed,
            "Cleared disk cache"
        );
        Ok(total)
    }

    /// Deletes one tile file (and its sidecar) if present.
    pub fn delete_tile_file(&self, path: &Path) -> Result<bool, CacheError> {
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        let meta = CacheLayout::metadata_path(path);
        if meta.is_file() {
            fs::remove_file(meta)?;
        }
        self.shared
            .index
            .retain(|_, entry| entry.file_path.as_deref() != Some(path));
        Ok(true)
    }

    /// Paths of every stored tile image.
    pub fn file_list(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        for dir in tileset_dirs(self.root())? {
            for item in fs::read_dir(&dir)? {
                let path = item?.path();
                if path.is_file() && self.shared.layout.is_tile_file(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Total number of stored tile images and their size in bytes.
    pub fn disk_usage(&self) -> Result<(usize, u64), CacheError> {
        let mut bytes = 0;
        let files = self.file_list()?;
        for path in &files {
            bytes += fs::metadata(path)?.len();
        }
        Ok((files.len(), bytes))
    }
}

// =============================================================================
// Daemon
// =============================================================================

type WriteOutcome = (TileKey, CacheEntry, Result<PathBuf, CacheError>);

/// The disk tier's cooperative loop.
pub struct FileCacheDaemon {
    shared: Arc<Shared>,
    loads: mpsc::UnboundedReceiver<LoadCompletion>,
    in_flight: JoinSet<WriteOutcome>,
    tick_interval: Duration,
}

impl FileCacheDaemon {
    /// One pass: apply finished work, then start at most one write.
    pub fn tick(&mut self) {
        while let Ok(load) = self.loads.try_recv() {
            self.apply_load(load);
        }
        while let Some(joined) = self.in_flight.try_join_next() {
            self.apply_write(joined);
        }
        self.start_next_write();
    }

    /// Number of writes currently running on blocking workers.
    pub fn writes_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Ticks until `shutdown` fires, then flushes pending writes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(root = %self.shared.layout.root().display(), "File cache daemon starting");

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    break;
                }

                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self.flush().await;
        info!("File cache daemon stopped");
    }

    /// Writes every live pending write and waits until nothing is in flight.
    ///
    /// Writes queued behind a running write for the same key are started
    /// once that write has been applied.
    pub async fn flush(&mut self) {
        loop {
            while self.start_next_write() {}
            match self.in_flight.join_next().await {
                Some(joined) => self.apply_write(joined),
                None => break,
            }
        }
        while let Ok(load) = self.loads.try_recv() {
            self.apply_load(load);
        }
    }

    /// Takes the next actionable write off the queue. Returns false if there
    /// was none.
    fn start_next_write(&mut self) -> bool {
        let next = self.shared.writes.lock().pop();
        match next {
            Some(Ok(write)) => self.spawn_write(write),
            Some(Err(superseded)) => release(superseded),
            None => return false,
        }
        true
    }

    fn spawn_write(&mut self, write: PendingWrite) {
        let path = self.shared.layout.tile_path(write.key.tileset(), &write.key.tile());
        let PendingWrite { key, entry, .. } = write;
        self.in_flight.spawn_blocking_on(
            move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| save_tile(&path, &entry)))
                    .unwrap_or_else(|_| Err(CacheError::Worker("tile write panicked".to_string())));
                (key, entry, result)
            },
            &self.shared.runtime,
        );
    }

    fn apply_write(&mut self, joined: Result<WriteOutcome, tokio::task::JoinError>) {
        let (key, mut entry, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Disk write worker failed");
                return;
            }
        };
        self.shared.writes.lock().finish(&key);

        match result {
            Ok(path) => {
                debug!(key = %key, path = %path.display(), "Tile saved");
                entry.file_path = Some(path);
                self.shared.index.insert(key.clone(), entry.clone());
                let _ = self
                    .shared
                    .events
                    .send(FileCacheEvent::FileSaved { key, entry });
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to save tile");
                let _ = self.shared.events.send(FileCacheEvent::WriteFailed {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    fn apply_load(&mut self, load: LoadCompletion) {
        let LoadCompletion {
            key,
            result,
            callback,
        } = load;
        match &result {
            Ok(entry) => {
                trace!(key = %key, "Tile loaded from disk");
                self.shared.index.insert(key, entry.clone());
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to load tile from disk"),
        }
        callback(result);
    }
}

/// Drops a superseded write without writing it.
fn release(write: PendingWrite) {
    trace!(key = %write.key, "Discarding superseded tile write");
    drop(write);
}

// =============================================================================
// Blocking I/O helpers
// =============================================================================

fn save_tile(path: &Path, entry: &CacheEntry) -> Result<PathBuf, CacheError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    // Same folder as the target so the rename replaces it in one step.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, &entry.data)?;
    fs::rename(&tmp, path)?;

    let metadata = serde_json::to_vec(&entry.metadata())?;
    fs::write(CacheLayout::metadata_path(path), metadata)?;

    Ok(path.to_path_buf())
}

fn load_tile(path: &Path) -> Result<CacheEntry, CacheError> {
    let data = fs::read(path)?;
    let image = image::load_from_memory(&data).map_err(|source| CacheError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let metadata = read_metadata(&CacheLayout::metadata_path(path));

    Ok(CacheEntry {
        data: Bytes::from(data),
        image: Some(Arc::new(image)),
        etag: metadata.etag,
        expires_at: metadata.expires_at,
        file_path: Some(path.to_path_buf()),
    })
}

/// Reads a sidecar, falling back to "no validator, already expired".
fn read_metadata(path: &Path) -> TileMetadata {
    match fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable tile metadata");
            TileMetadata::default()
        }),
        Err(_) => TileMetadata::default(),
    }
}

fn tileset_dirs(root: &Path) -> Result<Vec<PathBuf>, CacheError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for item in fs::read_dir(root)? {
        let path = item?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn clear_folder(dir: &Path) -> Result<ClearResult, CacheError> {
    let mut result = ClearResult::default();
    if !dir.is_dir() {
        return Ok(result);
    }
    for item in fs::read_dir(dir)? {
        let item = item?;
        let meta = item.metadata()?;
        if meta.is_file() {
            fs::remove_file(item.path())?;
            result.files_deleted += 1;
            result.bytes_freed += meta.len();
        }
    }
    Ok(result)
}
