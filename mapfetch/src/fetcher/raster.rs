//! Raster tile fetcher: cache waterfall with scheduled network fallback.
//!
//! ```text
//! fetch(tileset, tile)
//!   │
//!   ├─► memory hit ──────────────────────────────► TextureReceived
//!   │
//!   ├─► file exists ──► async load ──► TextureReceived
//!   │                                  └─► expired? ──► network (If-None-Match)
//!   │
//!   └─► miss ──────────────────────────────────────► network
//!
//! network = scheduler task (id and region derived from the tile key)
//!   └─► continuation on the scheduler loop:
//!         recycled target ──► discard
//!         error           ──► FetchingError, target marked Error
//!         304             ──► refresh stored expiry, no events
//!         200             ──► cache write, DataReceived + TextureReceived
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace, warn};

use super::events::{FetchError, FetchEvent};
use super::target::TileSlot;
use crate::cache::{CacheEntry, CacheError, CacheManager};
use crate::coord::{CanonicalTileId, TileKey};
use crate::scheduler::{Task, TaskId, TaskOutcome, TaskScheduler};
use crate::transport::{TileRequest, TileTransport, TransportResponse};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Parameters for a raster tile request.
#[derive(Debug, Clone)]
pub struct ImageDataFetcherParameters {
    pub tileset: String,
    pub tile: CanonicalTileId,
    pub use_retina: bool,
    pub target: Option<Arc<TileSlot>>,
}

impl ImageDataFetcherParameters {
    /// Retina by default, no target.
    pub fn new(tileset: impl Into<String>, tile: CanonicalTileId) -> Self {
        Self {
            tileset: tileset.into(),
            tile,
            use_retina: true,
            target: None,
        }
    }

    pub fn with_retina(mut self, use_retina: bool) -> Self {
        self.use_retina = use_retina;
        self
    }

    pub fn with_target(mut self, target: Arc<TileSlot>) -> Self {
        self.target = Some(target);
        self
    }
}

/// Parameters accepted by [`ImageDataFetcher::fetch_data`].
///
/// Only raster requests are served here; other kinds belong to other
/// fetchers and are ignored.
#[derive(Debug, Clone)]
pub enum DataFetcherParameters {
    Image(ImageDataFetcherParameters),
    Vector {
        tileset: String,
        tile: CanonicalTileId,
    },
    Terrain {
        tileset: String,
        tile: CanonicalTileId,
    },
}

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPath {
    Memory,
    /// An async disk load was issued; it may be followed by a network fetch.
    Disk,
    Network,
    /// The request was ignored.
    Rejected,
}

struct Inner {
    cache: CacheManager,
    scheduler: TaskScheduler,
    transport: Arc<dyn TileTransport>,
    events: broadcast::Sender<FetchEvent>,
}

/// Resolves raster tiles through memory, disk and network.
#[derive(Clone)]
pub struct ImageDataFetcher {
    inner: Arc<Inner>,
}

impl ImageDataFetcher {
    pub fn new(
        cache: CacheManager,
        scheduler: TaskScheduler,
        transport: Arc<dyn TileTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                cache,
                scheduler,
                transport,
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.inner.events.subscribe()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.inner.cache
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    /// Entry point for generic fetch parameters.
    pub fn fetch_data(&self, parameters: &DataFetcherParameters) -> FetchPath {
        match parameters {
            DataFetcherParameters::Image(p) => {
                self.fetch(&p.tileset, p.tile, p.use_retina, p.target.clone())
            }
            other => {
                debug!(parameters = ?other, "Ignoring non-image fetch parameters");
                FetchPath::Rejected
            }
        }
    }

    /// Resolves one tile.
    ///
    /// An unassigned `target` is assigned to the tile first. Invalid
    /// coordinates are ignored.
    pub fn fetch(
        &self,
        tileset: &str,
        tile: CanonicalTileId,
        use_retina: bool,
        target: Option<Arc<TileSlot>>,
    ) -> FetchPath {
        if let Err(e) = tile.validate() {
            debug!(tileset, tile = %tile, error = %e, "Ignoring invalid tile request");
            return FetchPath::Rejected;
        }
        if tileset.is_empty() {
            debug!(tile = %tile, "Ignoring tile request without tileset");
            return FetchPath::Rejected;
        }

        let key = TileKey::new(tileset, tile);
        if let Some(target) = &target {
            if target.key().is_none() {
                target.assign(key.clone());
            }
        }

        if let Some(entry) = self.inner.cache.get_texture_item_from_memory(tileset, &tile) {
            trace!(key = %key, "Memory cache hit");
            self.deliver_texture(&key, target, entry);
            return FetchPath::Memory;
        }

        if self.inner.cache.texture_file_exists(tileset, &tile) {
            let this = self.clone();
            let load_key = key.clone();
            let load_target = target.clone();
            let issued = self
                .inner
                .cache
                .get_texture_item_from_file(tileset, &tile, move |result| {
                    this.on_file_loaded(load_key, use_retina, load_target, result);
                });
            if issued {
                trace!(key = %key, "Loading tile from disk");
                return FetchPath::Disk;
            }
        }

        self.request_from_network(key, use_retina, String::new(), None, target);
        FetchPath::Network
    }

    /// Assigns `target` to a tile, marks it loading and fetches.
    pub fn register(
        &self,
        target: &Arc<TileSlot>,
        tileset: &str,
        tile: CanonicalTileId,
        use_retina: bool,
    ) -> FetchPath {
        target.assign(TileKey::new(tileset, tile));
        target.set_loading();
        self.fetch(tileset, tile, use_retina, Some(Arc::clone(target)))
    }

    /// Takes `target` off the map and cancels its queued fetches.
    pub fn unregister(&self, target: &TileSlot) -> usize {
        match target.unassign() {
            Some(key) => self.inner.scheduler.cancel_region(&key),
            None => 0,
        }
    }

    /// Cancels queued network fetches for a tile. Returns how many were
    /// dropped.
    pub fn cancel_fetching(&self, tileset: &str, tile: CanonicalTileId) -> usize {
        self.inner
            .scheduler
            .cancel_region(&TileKey::new(tileset, tile))
    }

    fn on_file_loaded(
        &self,
        key: TileKey,
        use_retina: bool,
        target: Option<Arc<TileSlot>>,
        result: Result<CacheEntry, CacheError>,
    ) {
        match result {
            Ok(entry) => {
                if is_recycled(&target, &key) {
                    trace!(key = %key, "Target recycled, discarding disk tile");
                    return;
                }
                let stale = entry.is_expired();
                self.deliver_texture(&key, target.clone(), entry.clone());
                if stale {
                    debug!(key = %key, etag = %entry.etag, "Disk tile expired, revalidating");
                    let etag = entry.etag.clone();
                    self.request_from_network(key, use_retina, etag, Some(entry), target);
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk load failed, fetching from network");
                self.request_from_network(key, use_retina, String::new(), None, target);
            }
        }
    }

    fn request_from_network(
        &self,
        key: TileKey,
        use_retina: bool,
        etag: String,
        stale: Option<CacheEntry>,
        target: Option<Arc<TileSlot>>,
    ) {
        let id = TaskId::for_key(&key);
        if let Some(target) = &target {
            target.add_request(id);
        }

        let (tx, rx) = oneshot::channel::<TransportResponse>();
        let transport = Arc::clone(&self.inner.transport);
        let request = TileRequest::new(key.tileset(), key.tile(), use_retina).with_etag(etag);

        let this = self.clone();
        let done_key = key.clone();
        let done_target = target.clone();
        let task = Task::new(key.clone(), "fetch tile", move || async move {
            let response = transport.fetch(request).await;
            let _ = tx.send(response);
            Ok(())
        })
        .with_id(id)
        .on_complete(move |outcome| {
            let mut rx = rx;
            let response = rx.try_recv().ok();
            this.on_fetched(id, done_key, done_target, stale, outcome, response);
        })
        .on_cancel(move || {
            if let Some(target) = target {
                target.remove_request(id);
            }
        });

        trace!(key = %key, task = %id, "Scheduling network fetch");
        self.inner.scheduler.submit(task);
    }

    fn on_fetched(
        &self,
        id: TaskId,
        key: TileKey,
        target: Option<Arc<TileSlot>>,
        stale: Option<CacheEntry>,
        outcome: TaskOutcome,
        response: Option<TransportResponse>,
    ) {
        if is_recycled(&target, &key) {
            trace!(key = %key, "Target recycled, discarding fetched tile");
        } else {
            match checked_response(outcome, response) {
                Ok(response) => self.store_response(&key, target.clone(), stale, response),
                Err(errors) => {
                    warn!(key = %key, errors = ?errors, "Tile fetch failed");
                    if let Some(target) = &target {
                        target.mark_error();
                    }
                    let _ = self.inner.events.send(FetchEvent::FetchingError {
                        target: target.clone(),
                        key,
                        errors,
                    });
                }
            }
        }

        if let Some(target) = target {
            target.remove_request(id);
        }
    }

    fn store_response(
        &self,
        key: &TileKey,
        target: Option<Arc<TileSlot>>,
        stale: Option<CacheEntry>,
        response: TransportResponse,
    ) {
        if response.is_not_modified() {
            let Some(stale) = stale else {
                warn!(key = %key, "Not-modified response without a cached tile");
                return;
            };
            debug!(key = %key, expires_at = %response.expires_at, "Tile still valid");
            let refreshed = CacheEntry {
                etag: response.etag,
                expires_at: response.expires_at,
                file_path: None,
                ..stale
            };
            self.inner
                .cache
                .add_texture_item(key.tileset(), &key.tile(), refreshed, true);
            return;
        }

        let mut entry = CacheEntry::new(response.data, response.etag, response.expires_at);
        entry.image = response.image;
        self.inner
            .cache
            .add_texture_item(key.tileset(), &key.tile(), entry.clone(), true);

        debug!(key = %key, bytes = entry.size_bytes(), "Tile received");
        let _ = self.inner.events.send(FetchEvent::DataReceived {
            target: target.clone(),
            key: key.clone(),
            entry: entry.clone(),
        });
        self.deliver_texture(key, target, entry);
    }

    fn deliver_texture(&self, key: &TileKey, target: Option<Arc<TileSlot>>, entry: CacheEntry) {
        if let (Some(target), Some(image)) = (&target, &entry.image) {
            target.set_texture(Arc::clone(image));
        }
        let _ = self.inner.events.send(FetchEvent::TextureReceived {
            target,
            key: key.clone(),
            entry,
        });
    }
}

fn is_recycled(target: &Option<Arc<TileSlot>>, key: &TileKey) -> bool {
    target.as_ref().is_some_and(|t| !t.is_assigned_to(key))
}

fn checked_response(
    outcome: TaskOutcome,
    response: Option<TransportResponse>,
) -> Result<TransportResponse, Vec<FetchError>> {
    match (outcome, response) {
        (TaskOutcome::Failed(e), _) => Err(vec![FetchError::Task(e.to_string())]),
        (TaskOutcome::Completed, None) => Err(vec![FetchError::NoResponse]),
        (TaskOutcome::Completed, Some(response)) if response.has_errors() => Err(response
            .errors
            .into_iter()
            .map(FetchError::from)
            .collect()),
        (TaskOutcome::Completed, Some(response)) => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FileCache, FileCacheConfig, FileCacheDaemon, MemoryCache};
    use crate::fetcher::target::RasterState;
    use crate::scheduler::{SchedulerConfig, SchedulerDaemon, TaskError};
    use crate::transport::{MockTransport, TransportError};
    use chrono::{Duration as ChronoDuration, Utc};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;

    fn png_bytes(shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(2, 2, Rgba([shade, shade, shade, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    struct Harness {
        _dir: TempDir,
        fetcher: ImageDataFetcher,
        mock: MockTransport,
        scheduler_daemon: SchedulerDaemon,
        disk_daemon: FileCacheDaemon,
        events: broadcast::Receiver<FetchEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let (disk, disk_daemon) = FileCache::new(FileCacheConfig::new(dir.path())).unwrap();
            let (scheduler, scheduler_daemon) =
                TaskScheduler::new(SchedulerConfig::default().with_grace_ticks(0));
            let mock = MockTransport::new();
            let fetcher = ImageDataFetcher::new(
                CacheManager::new(Arc::new(MemoryCache::new()), disk),
                scheduler,
                Arc::new(mock.clone()),
            );
            let events = fetcher.subscribe();
            Self {
                _dir: dir,
                fetcher,
                mock,
                scheduler_daemon,
                disk_daemon,
                events,
            }
        }

        async fn pump(&mut self, rounds: usize) {
            for _ in 0..rounds {
                self.disk_daemon.tick();
                self.scheduler_daemon.tick();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        async fn next_event(&mut self) -> FetchEvent {
            for _ in 0..500 {
                if let Ok(event) = self.events.try_recv() {
                    return event;
                }
                self.pump(1).await;
            }
            panic!("no fetch event");
        }
    }

    fn tile() -> CanonicalTileId {
        CanonicalTileId::new(4, 2, 3)
    }

    #[tokio::test]
    async fn test_non_image_parameters_are_ignored() {
        let h = Harness::new();
        let path = h.fetcher.fetch_data(&DataFetcherParameters::Vector {
            tileset: "abc".into(),
            tile: tile(),
        });
        assert_eq!(path, FetchPath::Rejected);
        assert_eq!(h.fetcher.scheduler().queued_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_are_ignored() {
        let h = Harness::new();
        let params = ImageDataFetcherParameters::new("abc", CanonicalTileId::new(2, 9, 0));
        assert_eq!(
            h.fetcher.fetch_data(&DataFetcherParameters::Image(params)),
            FetchPath::Rejected
        );
        assert_eq!(h.fetcher.scheduler().queued_count(), 0);
    }

    #[tokio::test]
    async fn test_error_marks_target_and_keeps_texture() {
        let mut h = Harness::new();
        h.mock.respond(
            "abc",
            tile(),
            TransportResponse::failed(TransportError::Status {
                status: 500,
                url: "u".into(),
            }),
        );
        let slot = Arc::new(TileSlot::for_key(TileKey::new("abc", tile())));
        let old = Arc::new(image::DynamicImage::ImageRgba8(RgbaImage::new(1, 1)));
        slot.set_texture(Arc::clone(&old));

        assert_eq!(
            h.fetcher.fetch("abc", tile(), false, Some(Arc::clone(&slot))),
            FetchPath::Network
        );
        assert_eq!(slot.in_flight_count(), 1);

        match h.next_event().await {
            FetchEvent::FetchingError { errors, key, .. } => {
                assert_eq!(key, TileKey::new("abc", tile()));
                assert!(matches!(errors.as_slice(), [FetchError::Transport(_)]));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(slot.state(), RasterState::Error);
        assert!(slot.texture().is_some());
        assert_eq!(slot.in_flight_count(), 0);
        assert!(h
            .fetcher
            .cache()
            .get_texture_item_from_memory("abc", &tile())
            .is_none());
    }

    #[tokio::test]
    async fn test_recycled_target_discards_result() {
        let mut h = Harness::new();
        h.mock.respond(
            "abc",
            tile(),
            MockTransport::ok(png_bytes(9), "v1", Utc::now() + ChronoDuration::hours(1)),
        );
        let slot = Arc::new(TileSlot::for_key(TileKey::new("abc", tile())));
        h.fetcher.fetch("abc", tile(), false, Some(Arc::clone(&slot)));

        slot.assign(TileKey::new("abc", CanonicalTileId::new(4, 0, 0)));
        h.pump(50).await;

        assert!(h.events.try_recv().is_err());
        assert!(slot.texture().is_none());
        assert!(h
            .fetcher
            .cache()
            .get_texture_item_from_memory("abc", &tile())
            .is_none());
        assert_eq!(h.mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_fetching_releases_target() {
        let h = Harness::new();
        let slot = Arc::new(TileSlot::new());
        h.fetcher.register(&slot, "abc", tile(), false);
        assert_eq!(slot.state(), RasterState::Loading);
        assert_eq!(slot.in_flight_count(), 1);

        assert_eq!(h.fetcher.cancel_fetching("abc", tile()), 1);
        assert_eq!(slot.in_flight_count(), 0);
        assert_eq!(h.mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unregister_cancels_queued_fetch() {
        let mut h = Harness::new();
        let slot = Arc::new(TileSlot::new());
        h.fetcher.register(&slot, "abc", tile(), false);

        assert_eq!(h.fetcher.unregister(&slot), 1);
        h.pump(10).await;
        assert_eq!(h.mock.request_count(), 0);
        assert_eq!(slot.state(), RasterState::Unregistered);
    }

    #[tokio::test]
    async fn test_not_modified_refreshes_expiry_without_events() {
        let mut h = Harness::new();
        let stale = CacheEntry::new(png_bytes(3), "\"v1\"", Utc::now() - ChronoDuration::hours(1));
        h.fetcher
            .cache()
            .disk()
            .add("abc", &tile(), stale.clone(), true);
        h.disk_daemon.flush().await;

        let fresh_until = Utc::now() + ChronoDuration::hours(2);
        h.mock
            .respond("abc", tile(), MockTransport::not_modified("\"v1\"", fresh_until));

        assert_eq!(h.fetcher.fetch("abc", tile(), false, None), FetchPath::Disk);
        assert!(h.next_event().await.is_texture());

        let mut refreshed = None;
        for _ in 0..500 {
            h.pump(1).await;
            let cached = h
                .fetcher
                .cache()
                .get_texture_item_from_memory("abc", &tile());
            if let Some(cached) = cached.filter(|c| c.expires_at == fresh_until) {
                refreshed = Some(cached);
                break;
            }
        }
        let refreshed = refreshed.expect("expiry was not refreshed");
        assert_eq!(refreshed.data, stale.data);
        assert!(refreshed.image.is_some());
        assert_eq!(h.mock.requests()[0].etag, "\"v1\"");
        h.pump(5).await;
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn test_checked_response() {
        let failed = checked_response(TaskOutcome::Failed(TaskError::new("x")), None);
        assert!(matches!(failed.unwrap_err().as_slice(), [FetchError::Task(_)]));

        let missing = checked_response(TaskOutcome::Completed, None);
        assert_eq!(missing.unwrap_err(), vec![FetchError::NoResponse]);

        let ok = MockTransport::ok(png_bytes(1), "", Utc::now());
        assert!(checked_response(TaskOutcome::Completed, Some(ok)).is_ok());
    }
}
