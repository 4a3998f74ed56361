//! Tile data fetching.
//!
//! [`ImageDataFetcher`] resolves raster tiles through the cache tiers and
//! falls back to scheduled network fetches. Results are published as
//! [`FetchEvent`]s and applied to the requesting [`TileSlot`], if any.

mod events;
mod raster;
mod target;

pub use events::{FetchError, FetchEvent};
pub use raster::{DataFetcherParameters, FetchPath, ImageDataFetcher, ImageDataFetcherParameters};
pub use target::{RasterState, TileSlot};
