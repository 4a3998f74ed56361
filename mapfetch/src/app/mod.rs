//! Application bootstrap and lifecycle.
//!
//! [`TilePipeline`] wires the caches, scheduler, transport and fetcher
//! together, runs the scheduler and disk cache loops on the current Tokio
//! runtime and stops them in order on shutdown.
//!
//! # Example
//!
//! ```ignore
//! use mapfetch::app::{AppConfig, TilePipeline};
//! use mapfetch::config::ConfigFile;
//!
//! let config = AppConfig::from_config_file(&ConfigFile::load()?);
//! let pipeline = TilePipeline::start(config).await?;
//!
//! let mut events = pipeline.fetcher().subscribe();
//! pipeline.fetcher().fetch("mapbox.satellite", tile, true, None);
//!
//! // Later: stop the loops and flush pending disk writes
//! pipeline.shutdown().await;
//! ```

mod bootstrap;
mod config;
mod error;

pub use bootstrap::TilePipeline;
pub use config::AppConfig;
pub use error::AppError;
