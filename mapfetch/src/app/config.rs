//! Application configuration for [`TilePipeline`](super::TilePipeline).
//!
//! `AppConfig` groups the component configs so every part of the pipeline is
//! configured from one place, usually a loaded [`ConfigFile`].

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::FileCacheConfig;
use crate::config::ConfigFile;
use crate::scheduler::SchedulerConfig;
use crate::transport::HttpTransportConfig;

/// Top-level configuration passed to `TilePipeline::start()`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Disk cache root, extension and tick.
    pub disk_cache: FileCacheConfig,

    /// Memory tier bound; `None` is unbounded.
    pub memory_max_entries: Option<u64>,

    pub scheduler: SchedulerConfig,

    pub network: HttpTransportConfig,
}

impl AppConfig {
    /// Default settings with the disk cache rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            disk_cache: FileCacheConfig::new(cache_dir),
            memory_max_entries: None,
            scheduler: SchedulerConfig::default(),
            network: HttpTransportConfig::default(),
        }
    }

    /// Translates the user's configuration file.
    ///
    /// The scheduler and the disk cache share one tick interval.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let tick = Duration::from_millis(config.scheduler.tick_interval_ms.max(1));

        Self {
            disk_cache: FileCacheConfig::new(config.cache.directory.clone())
                .with_extension(config.cache.file_extension.clone())
                .with_tick_interval(tick),
            memory_max_entries: config.cache.memory_max_entries,
            scheduler: SchedulerConfig::default()
                .with_active_task_limit(config.scheduler.active_task_limit)
                .with_grace_ticks(config.scheduler.grace_ticks)
                .with_tick_interval(tick),
            network: HttpTransportConfig {
                access_token: config.network.access_token.clone(),
                timeout: Duration::from_secs(config.network.timeout),
                default_ttl: Duration::from_secs(config.network.default_ttl),
                user_agent: config.network.user_agent.clone(),
            },
        }
    }

    pub fn with_memory_max_entries(mut self, max_entries: Option<u64>) -> Self {
        self.memory_max_entries = max_entries;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the tick interval of both loops.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.scheduler.tick_interval = interval;
        self.disk_cache.tick_interval = interval;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.network.access_token = Some(token.into());
        self
    }
}

impl From<&ConfigFile> for AppConfig {
    fn from(config: &ConfigFile) -> Self {
        Self::from_config_file(config)
    }
}
