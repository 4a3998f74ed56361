//! CLI error handling with user-friendly messages.

use std::fmt;
use std::path::PathBuf;
use std::process;

use mapfetch::app::AppError;
use mapfetch::cache::CacheError;
use mapfetch::config::ConfigFileError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration file could not be read or written
    Config(ConfigFileError),
    /// Pipeline could not be started
    Startup(AppError),
    /// Tile coordinates or tileset were rejected
    InvalidTile(String),
    /// The tile could not be fetched
    Fetch(String),
    /// Disk cache operation failed
    Cache(CacheError),
    /// Failed to write output file
    FileWrite {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl CliError {
    /// Prints the error and exits with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Fetch(_) => {
                eprintln!();
                eprintln!("Mapbox tilesets need an access token:");
                eprintln!("  set access_token in the [network] section of config.ini");
                eprintln!("  or pass --access-token");
            }
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Run 'mapfetch config path' to locate the configuration file.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Startup(e) => write!(f, "{}", e),
            CliError::InvalidTile(msg) => write!(f, "Invalid tile: {}", msg),
            CliError::Fetch(msg) => write!(f, "Failed to fetch tile: {}", msg),
            CliError::Cache(e) => write!(f, "Cache error: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Startup(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            CliError::InvalidTile(_) | CliError::Fetch(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<AppError> for CliError {
    fn from(e: AppError) -> Self {
        CliError::Startup(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}
