//! Notifications produced by the fetcher.

use std::sync::Arc;

use thiserror::Error;

use super::target::TileSlot;
use crate::cache::CacheEntry;
use crate::coord::TileKey;
use crate::transport::TransportError;

/// Why a fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The scheduled work failed before producing a response.
    #[error("Fetch task failed: {0}")]
    Task(String),

    /// The work finished without handing back a response.
    #[error("No response received")]
    NoResponse,
}

/// Fetcher notifications, delivered over a broadcast channel.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// New tile data arrived from the network.
    DataReceived {
        target: Option<Arc<TileSlot>>,
        key: TileKey,
        entry: CacheEntry,
    },

    /// A tile image is ready to display, from any tier.
    TextureReceived {
        target: Option<Arc<TileSlot>>,
        key: TileKey,
        entry: CacheEntry,
    },

    /// The network fetch failed; nothing was cached.
    FetchingError {
        target: Option<Arc<TileSlot>>,
        key: TileKey,
        errors: Vec<FetchError>,
    },
}

impl FetchEvent {
    pub fn key(&self) -> &TileKey {
        match self {
            Self::DataReceived { key, .. }
            | Self::TextureReceived { key, .. }
            | Self::FetchingError { key, .. } => key,
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, Self::TextureReceived { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::FetchingError { .. })
    }
}
