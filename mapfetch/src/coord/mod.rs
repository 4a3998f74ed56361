//! Tile identity types.
//!
//! A raster tile is addressed by a zoom level and an x/y grid position
//! ([`CanonicalTileId`]). Combined with the tileset it belongs to, that forms
//! a [`TileKey`], which is used both as the cache key and as the scheduler's
//! region key for bulk cancellation.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Highest zoom level a tile identifier may carry.
pub const MAX_ZOOM: u8 = 30;

/// Errors produced when validating tile coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Zoom level is above [`MAX_ZOOM`].
    #[error("Invalid zoom level {0} (max 30)")]
    InvalidZoom(u8),

    /// Column or row is outside the `2^zoom` grid.
    #[error("Tile {x}/{y} is outside the grid at zoom {zoom}")]
    OutOfRange { zoom: u8, x: u32, y: u32 },
}

/// Web Mercator tile address: zoom, column (x) and row (y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalTileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    /// Creates a tile id without validating it.
    pub const fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Creates a tile id, rejecting coordinates outside the grid.
    pub fn checked(zoom: u8, x: u32, y: u32) -> Result<Self, CoordError> {
        let tile = Self::new(zoom, x, y);
        tile.validate()?;
        Ok(tile)
    }

    /// Checks that the zoom is supported and x/y fall inside `2^zoom`.
    pub fn validate(&self) -> Result<(), CoordError> {
        if self.zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(self.zoom));
        }
        let size = 1u64 << self.zoom;
        if u64::from(self.x) >= size || u64::from(self.y) >= size {
            return Err(CoordError::OutOfRange {
                zoom: self.zoom,
                x: self.x,
                y: self.y,
            });
        }
        Ok(())
    }

    /// Returns true if [`validate`](Self::validate) passes.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// File stem used by the disk cache: `zoom_x_y`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.zoom, self.x, self.y)
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// A tile within a specific tileset.
///
/// Cheap to clone: the tileset id is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    tileset: Arc<str>,
    tile: CanonicalTileId,
}

impl TileKey {
    /// Creates a key for `tile` within `tileset`.
    pub fn new(tileset: impl Into<Arc<str>>, tile: CanonicalTileId) -> Self {
        Self {
            tileset: tileset.into(),
            tile,
        }
    }

    /// The tileset identifier.
    pub fn tileset(&self) -> &str {
        &self.tileset
    }

    /// The tile coordinate.
    pub fn tile(&self) -> CanonicalTileId {
        self.tile
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tileset, self.tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_accepts_grid_corners() {
        assert!(CanonicalTileId::checked(0, 0, 0).is_ok());
        assert!(CanonicalTileId::checked(4, 15, 15).is_ok());
        assert!(CanonicalTileId::checked(MAX_ZOOM, (1 << 30) - 1, 0).is_ok());
    }

    #[test]
    fn test_checked_rejects_out_of_range() {
        assert_eq!(
            CanonicalTileId::checked(4, 16, 0),
            Err(CoordError::OutOfRange { zoom: 4, x: 16, y: 0 })
        );
        assert_eq!(
            CanonicalTileId::checked(31, 0, 0),
            Err(CoordError::InvalidZoom(31))
        );
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(CanonicalTileId::new(4, 2, 3).file_stem(), "4_2_3");
    }

    #[test]
    fn test_tile_key_equality() {
        let a = TileKey::new("abc", CanonicalTileId::new(4, 2, 3));
        let b = TileKey::new(String::from("abc"), CanonicalTileId::new(4, 2, 3));
        let other_tileset = TileKey::new("abd", CanonicalTileId::new(4, 2, 3));
        let other_tile = TileKey::new("abc", CanonicalTileId::new(4, 3, 2));

        assert_eq!(a, b);
        assert_ne!(a, other_tileset);
        assert_ne!(a, other_tile);
    }

    #[test]
    fn test_tile_key_display() {
        let key = TileKey::new("mapbox.satellite", CanonicalTileId::new(12, 655, 1583));
        assert_eq!(key.to_string(), "mapbox.satellite/12/655/1583");
    }
}
