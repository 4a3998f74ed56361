//! `mapfetch fetch`: resolve one tile through the cache tiers.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use mapfetch::app::{AppConfig, TilePipeline};
use mapfetch::cache::CacheEntry;
use mapfetch::config::ConfigFile;
use mapfetch::coord::{CanonicalTileId, TileKey};
use mapfetch::fetcher::{FetchEvent, FetchPath};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use super::common::format_size;
use crate::error::CliError;

/// Extra time allowed on top of the HTTP timeout for scheduling and disk I/O.
const WAIT_MARGIN: Duration = Duration::from_secs(5);

/// Arguments of the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Tileset id (e.g. mapbox.satellite), mapbox://styles/<user>/<style>,
    /// or an http(s) URL template with {z}, {x} and {y}
    #[arg(long)]
    pub tileset: String,

    /// Zoom level
    #[arg(long)]
    pub zoom: u8,

    /// Tile column
    #[arg(long)]
    pub x: u32,

    /// Tile row
    #[arg(long)]
    pub y: u32,

    /// Request high-resolution (@2x) tiles
    #[arg(long)]
    pub retina: bool,

    /// Copy the tile image to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Mapbox access token (overrides config.ini)
    #[arg(long)]
    pub access_token: Option<String>,

    /// Disk cache directory (overrides config.ini)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Run the fetch command.
pub async fn run(args: FetchArgs, config: &ConfigFile) -> Result<(), CliError> {
    let tile = CanonicalTileId::checked(args.zoom, args.x, args.y)
        .map_err(|e| CliError::InvalidTile(e.to_string()))?;

    let mut app_config = AppConfig::from_config_file(config);
    if let Some(token) = args.access_token {
        app_config = app_config.with_access_token(token);
    }
    if let Some(dir) = args.cache_dir {
        app_config.disk_cache.root = dir;
    }
    let wait = app_config.network.timeout + WAIT_MARGIN;

    let pipeline = TilePipeline::start(app_config).await?;
    let result = fetch_tile(&pipeline, &args.tileset, tile, args.retina, wait).await;

    // Let a background revalidation of a stale tile finish before stopping
    wait_until_idle(&pipeline, wait).await;
    let cached_at = pipeline.cache().disk().tile_path(&args.tileset, &tile);
    pipeline.shutdown().await;

    let (path, entry) = result?;

    println!("Tile:    {}", TileKey::new(args.tileset.as_str(), tile));
    println!("Source:  {}", source_name(path));
    println!("Size:    {}", format_size(entry.size_bytes() as u64));
    if !entry.etag.is_empty() {
        println!("ETag:    {}", entry.etag);
    }
    println!("Expires: {}", entry.expires_at.to_rfc3339());
    if cached_at.exists() {
        println!("Cached:  {}", cached_at.display());
    }

    if let Some(output) = args.output {
        std::fs::write(&output, &entry.data).map_err(|error| CliError::FileWrite {
            path: output.clone(),
            error,
        })?;
        println!("Saved:   {}", output.display());
    }

    Ok(())
}

/// Issues the fetch and waits for its texture or its error.
async fn fetch_tile(
    pipeline: &TilePipeline,
    tileset: &str,
    tile: CanonicalTileId,
    retina: bool,
    wait: Duration,
) -> Result<(FetchPath, CacheEntry), CliError> {
    let key = TileKey::new(tileset, tile);
    let mut events = pipeline.fetcher().subscribe();

    let path = pipeline.fetcher().fetch(tileset, tile, retina, None);
    if path == FetchPath::Rejected {
        return Err(CliError::InvalidTile(format!("{} was rejected", key)));
    }
    info!(key = %key, path = ?path, "Fetch issued");

    let outcome = tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(FetchEvent::TextureReceived { key: k, entry, .. }) if k == key => {
                    return Ok(entry);
                }
                Ok(FetchEvent::FetchingError { key: k, errors, .. }) if k == key => {
                    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                    return Err(CliError::Fetch(messages.join("; ")));
                }
                Ok(other) => debug!(key = %other.key(), "Ignoring fetch event"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Fetch events lagged"),
                Err(RecvError::Closed) => {
                    return Err(CliError::Fetch("fetcher stopped".to_string()));
                }
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result.map(|entry| (path, entry)),
        Err(_) => Err(CliError::Fetch(format!(
            "no response within {}s",
            wait.as_secs()
        ))),
    }
}

async fn wait_until_idle(pipeline: &TilePipeline, wait: Duration) {
    let scheduler = pipeline.scheduler();
    let _ = tokio::time::timeout(wait, async {
        while scheduler.running_count() > 0 || scheduler.queued_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
}

fn source_name(path: FetchPath) -> &'static str {
    match path {
        FetchPath::Memory => "memory",
        FetchPath::Disk => "disk",
        FetchPath::Network => "network",
        FetchPath::Rejected => "rejected",
    }
}
