//! Configuration management CLI commands.

use std::path::Path;

use clap::Subcommand;
use mapfetch::config::{config_file_path, ConfigFile};

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective settings
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, path: Option<&Path>) -> Result<(), CliError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);

    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Init { force } => run_init(&path, force),
        ConfigCommands::Show => run_show(&path),
    }
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        println!("Configuration already exists: {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    ConfigFile::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = load_config(Some(path))?;

    println!("[cache]");
    println!("  directory = {}", config.cache.directory.display());
    println!("  file_extension = {}", config.cache.file_extension);
    println!(
        "  memory_max_entries = {}",
        config
            .cache
            .memory_max_entries
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(unbounded)".to_string())
    );
    println!();
    println!("[scheduler]");
    println!("  active_task_limit = {}", config.scheduler.active_task_limit);
    println!("  grace_ticks = {}", config.scheduler.grace_ticks);
    println!("  tick_interval_ms = {}", config.scheduler.tick_interval_ms);
    println!();
    println!("[network]");
    println!(
        "  access_token = {}",
        if config.network.access_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("  timeout = {}", config.network.timeout);
    println!("  default_ttl = {}", config.network.default_ttl);
    println!("  user_agent = {}", config.network.user_agent);
    println!();
    println!("[logging]");
    println!("  directory = {}", config.logging.directory.display());
    println!("  file = {}", config.logging.file);

    Ok(())
}
