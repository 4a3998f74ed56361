//! mapfetch - raster map tile fetching and caching
//!
//! Resolves map tiles through an in-memory tier, an on-disk tier and a
//! rate-limited network scheduler. Network work runs on a fixed number of
//! concurrent tasks, queued fetches for a tile can be cancelled while the
//! map moves, and results are only applied to targets still showing the
//! tile they were requested for.
//!
//! # Modules
//!
//! - [`coord`]: tile coordinates and cache keys
//! - [`scheduler`]: region-cancellable task scheduler
//! - [`cache`]: memory and disk tiers behind [`cache::CacheManager`]
//! - [`transport`]: HTTP tile transport with ETag revalidation
//! - [`fetcher`]: the memory, disk, network resolution flow
//! - [`app`]: wiring and lifecycle of a running pipeline
//! - [`config`] and [`logging`]: user configuration and log setup

pub mod app;
pub mod cache;
pub mod config;
pub mod coord;
pub mod fetcher;
pub mod logging;
pub mod scheduler;
pub mod transport;
