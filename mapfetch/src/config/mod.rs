//! User configuration loaded from `config.ini`.
//!
//! [`ConfigFile`] holds one settings struct per INI section. Parsing lives in
//! `parser`, serialization in `writer`; [`crate::app::AppConfig`] is built
//! from a loaded file.
//!
//! # Example
//!
//! ```ignore
//! use mapfetch::config::ConfigFile;
//!
//! let config = ConfigFile::load()?;
//! println!("cache at {}", config.cache.directory.display());
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError, CONFIG_FILE_NAME};
pub use parser::expand_tilde;
pub use settings::{
    default_log_dir, CacheSettings, LoggingSettings, NetworkSettings, SchedulerSettings,
    DEFAULT_LOG_FILE,
};
