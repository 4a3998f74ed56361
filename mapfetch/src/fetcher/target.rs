//! The object a fetched tile is delivered to.
//!
//! A [`TileSlot`] stands for one renderer tile. Slots are recycled: when the
//! map scrolls, a slot is reassigned to another tile while fetches for its
//! previous tile may still be running. Results are only applied if the slot
//! is still assigned to the tile they were fetched for.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;

use crate::coord::TileKey;
use crate::scheduler::TaskId;

/// Raster loading state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterState {
    /// Not part of the map; results are ignored.
    #[default]
    Unregistered,
    /// Assigned, nothing requested yet.
    None,
    Loading,
    Loaded,
    /// The last fetch failed. Any previous texture is kept.
    Error,
}

#[derive(Default)]
struct SlotState {
    key: Option<TileKey>,
    state: RasterState,
    texture: Option<Arc<DynamicImage>>,
    in_flight: HashSet<TaskId>,
}

/// A recyclable tile target.
#[derive(Default)]
pub struct TileSlot {
    inner: Mutex<SlotState>,
}

impl TileSlot {
    /// Creates an unassigned slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a slot assigned to `key`.
    pub fn for_key(key: TileKey) -> Self {
        let slot = Self::new();
        slot.assign(key);
        slot
    }

    /// Reassigns the slot to another tile.
    ///
    /// State, texture and in-flight requests of the previous tile are
    /// forgotten.
    pub fn assign(&self, key: TileKey) {
        let mut inner = self.inner.lock();
        inner.key = Some(key);
        inner.state = RasterState::None;
        inner.texture = None;
        inner.in_flight.clear();
    }

    /// Removes the slot from the map. Returns the tile it was assigned to.
    pub fn unassign(&self) -> Option<TileKey> {
        let mut inner = self.inner.lock();
        inner.state = RasterState::Unregistered;
        inner.in_flight.clear();
        inner.key.take()
    }

    pub fn key(&self) -> Option<TileKey> {
        self.inner.lock().key.clone()
    }

    /// Returns true if the slot currently stands for `key`.
    pub fn is_assigned_to(&self, key: &TileKey) -> bool {
        self.inner.lock().key.as_ref() == Some(key)
    }

    pub fn state(&self) -> RasterState {
        self.inner.lock().state
    }

    pub fn texture(&self) -> Option<Arc<DynamicImage>> {
        self.inner.lock().texture.clone()
    }

    pub fn set_loading(&self) {
        let mut inner = self.inner.lock();
        if inner.state != RasterState::Unregistered {
            inner.state = RasterState::Loading;
        }
    }

    /// Applies a texture. Ignored once the slot is unregistered.
    pub fn set_texture(&self, texture: Arc<DynamicImage>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == RasterState::Unregistered {
            return false;
        }
        inner.texture = Some(texture);
        inner.state = RasterState::Loaded;
        true
    }

    /// Marks the slot failed, keeping its texture. Ignored once unregistered.
    pub fn mark_error(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == RasterState::Unregistered {
            return false;
        }
        inner.state = RasterState::Error;
        true
    }

    pub(crate) fn add_request(&self, id: TaskId) {
        self.inner.lock().in_flight.insert(id);
    }

    pub(crate) fn remove_request(&self, id: TaskId) -> bool {
        self.inner.lock().in_flight.remove(&id)
    }

    /// Number of network requests in flight for this slot.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().in_flight.len()
    }
}

impl fmt::Debug for TileSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TileSlot")
            .field("key", &inner.key)
            .field("state", &inner.state)
            .field("has_texture", &inner.texture.is_some())
            .field("in_flight", &inner.in_flight.len())
            .finish()
    }
}
