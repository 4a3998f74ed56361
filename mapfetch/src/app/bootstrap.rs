//! Pipeline bootstrap implementation.
//!
//! `TilePipeline` builds every component from an [`AppConfig`] and owns the
//! background loops. Components are wired explicitly; nothing is global.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::AppConfig;
use super::error::AppError;
use crate::cache::{CacheManager, FileCache, MemoryCache};
use crate::fetcher::ImageDataFetcher;
use crate::scheduler::TaskScheduler;
use crate::transport::{HttpTransport, TileTransport};

/// A running fetch pipeline.
///
/// Loops are started in dependency order (disk cache, then scheduler) and
/// stopped in reverse, so writes produced by the last scheduler tick are
/// still flushed to disk.
pub struct TilePipeline {
    fetcher: ImageDataFetcher,

    scheduler_shutdown: CancellationToken,
    scheduler_handle: JoinHandle<()>,

    disk_shutdown: CancellationToken,
    disk_handle: JoinHandle<()>,

    config: AppConfig,
}

impl TilePipeline {
    /// Starts the pipeline with the HTTP transport.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache root cannot be created or the HTTP
    /// client cannot be built.
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        let transport = HttpTransport::new(config.network.clone())?;
        Self::start_with_transport(config, Arc::new(transport)).await
    }

    /// Starts the pipeline with a caller-supplied transport.
    pub async fn start_with_transport(
        config: AppConfig,
        transport: Arc<dyn TileTransport>,
    ) -> Result<Self, AppError> {
        info!("Starting tile pipeline");

        // 1. Disk cache FIRST; the fetcher's completions write into it
        let (disk, disk_daemon) = FileCache::new(config.disk_cache.clone())?;
        let disk_shutdown = CancellationToken::new();
        let disk_handle = tokio::spawn(disk_daemon.run(disk_shutdown.clone()));

        info!(
            directory = %config.disk_cache.root.display(),
            extension = %config.disk_cache.extension,
            "Disk cache started"
        );

        // 2. Memory tier
        let memory = Arc::new(MemoryCache::with_max_entries(config.memory_max_entries));
        let cache = CacheManager::new(memory, disk);

        // 3. Scheduler
        let (scheduler, scheduler_daemon) = TaskScheduler::new(config.scheduler.clone());
        let scheduler_shutdown = CancellationToken::new();
        let scheduler_handle = tokio::spawn(scheduler_daemon.run(scheduler_shutdown.clone()));

        info!(
            active_task_limit = config.scheduler.active_task_limit,
            grace_ticks = config.scheduler.grace_ticks,
            "Task scheduler started"
        );

        let fetcher = ImageDataFetcher::new(cache, scheduler, transport);

        Ok(Self {
            fetcher,
            scheduler_shutdown,
            scheduler_handle,
            disk_shutdown,
            disk_handle,
            config,
        })
    }

    pub fn fetcher(&self) -> &ImageDataFetcher {
        &self.fetcher
    }

    pub fn cache(&self) -> &CacheManager {
        self.fetcher.cache()
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        self.fetcher.scheduler()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stops the scheduler, then the disk cache after it has flushed its
    /// pending writes.
    pub async fn shutdown(self) {
        info!("Shutting down tile pipeline");

        self.scheduler_shutdown.cancel();
        if let Err(e) = self.scheduler_handle.await {
            tracing::warn!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Task scheduler shut down");

        self.disk_shutdown.cancel();
        if let Err(e) = self.disk_handle.await {
            tracing::warn!(error = %e, "Disk cache loop ended abnormally");
        }
        info!("Disk cache shut down");

        info!("Tile pipeline shutdown complete");
    }
}
