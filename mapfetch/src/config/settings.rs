//! Settings structs, one per `[section]` of the INI file.

use std::path::PathBuf;

use crate::cache::{FileCacheConfig, DEFAULT_FILE_EXTENSION};
use crate::scheduler::{DEFAULT_ACTIVE_TASK_LIMIT, DEFAULT_GRACE_TICKS, DEFAULT_TICK_INTERVAL};
use crate::transport::{DEFAULT_TIMEOUT, DEFAULT_TTL, DEFAULT_USER_AGENT};

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "mapfetch.log";

/// `<user cache dir>/mapfetch/logs`.
pub fn default_log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mapfetch")
        .join("logs")
}

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub scheduler: SchedulerSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Disk cache root; one folder per tileset is created below it.
    pub directory: PathBuf,
    /// Extension of cached image files.
    pub file_extension: String,
    /// Memory tier bound. `None` keeps every tile until cleared.
    pub memory_max_entries: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: FileCacheConfig::default_root(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            memory_max_entries: None,
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub active_task_limit: usize,
    pub grace_ticks: u64,
    pub tick_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            active_task_limit: DEFAULT_ACTIVE_TASK_LIMIT,
            grace_ticks: DEFAULT_GRACE_TICKS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
        }
    }
}

/// `[network]` section. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Mapbox access token appended to Mapbox tile URLs.
    pub access_token: Option<String>,
    pub timeout: u64,
    /// Lifetime of tiles whose response carries no caching headers.
    pub default_ttl: u64,
    pub user_agent: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            access_token: None,
            timeout: DEFAULT_TIMEOUT.as_secs(),
            default_ttl: DEFAULT_TTL.as_secs(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}
