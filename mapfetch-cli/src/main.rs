//! mapfetch CLI - fetch and cache raster map tiles.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mapfetch::logging::init_logging;

use commands::cache::CacheAction;
use commands::common::load_config;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "mapfetch")]
#[command(version, about = "Fetch and cache raster map tiles", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/mapfetch/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one tile through memory, disk and network
    Fetch(FetchArgs),

    /// Manage the disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Config { command } => commands::config::run(command, cli.config.as_deref()),
        Commands::Cache { action } => {
            let config = load_config(cli.config.as_deref())?;
            commands::cache::run(action, &config)
        }
        Commands::Fetch(args) => {
            let config = load_config(cli.config.as_deref())?;
            let _logging = init_logging(&config.logging.directory, &config.logging.file)
                .map_err(CliError::LoggingInit)?;
            commands::fetch::run(args, &config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "mapfetch",
            "fetch",
            "--tileset",
            "mapbox.satellite",
            "--zoom",
            "4",
            "--x",
            "2",
            "--y",
            "3",
            "--retina",
        ])
        .unwrap();

        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.tileset, "mapbox.satellite");
                assert_eq!((args.zoom, args.x, args.y), (4, 2, 3));
                assert!(args.retina);
                assert!(args.output.is_none());
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_parse_cache_clear_with_tileset() {
        let cli =
            Cli::try_parse_from(["mapfetch", "cache", "clear", "--tileset", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Clear { tileset: Some(ref t) }
            } if t == "abc"
        ));
    }
}
