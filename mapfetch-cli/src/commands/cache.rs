//! Cache management CLI commands.

use clap::Subcommand;
use mapfetch::app::AppConfig;
use mapfetch::cache::FileCache;
use mapfetch::config::ConfigFile;

use super::common::format_size;
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Delete cached tiles from disk
    Clear {
        /// Only clear this tileset
        #[arg(long)]
        tileset: Option<String>,
    },
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, config: &ConfigFile) -> Result<(), CliError> {
    let app_config = AppConfig::from_config_file(config);
    let cache_dir = app_config.disk_cache.root.clone();
    // The daemon is only needed for queued writes; these commands do not queue any
    let (cache, _daemon) = FileCache::new(app_config.disk_cache)?;

    match action {
        CacheAction::Clear { tileset } => {
            let result = match tileset.as_deref() {
                Some(tileset) => {
                    println!("Clearing tileset '{}' in: {}", tileset, cache_dir.display());
                    cache.clear_tileset_files(tileset)?
                }
                None => {
                    println!("Clearing disk cache at: {}", cache_dir.display());
                    cache.clear_all()?
                }
            };
            println!(
                "Deleted {} files, freed {}",
                result.files_deleted,
                format_size(result.bytes_freed)
            );
            Ok(())
        }
        CacheAction::Stats => {
            let (files, bytes) = cache.disk_usage()?;
            println!("Disk cache: {}", cache_dir.display());
            println!("  Tiles: {}", files);
            println!("  Size:  {}", format_size(bytes));
            Ok(())
        }
    }
}
