//! Serialization of a `ConfigFile` into a commented INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Renders the configuration as the commented INI written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let memory_max_entries = config
        .cache
        .memory_max_entries
        .map(|n| n.to_string())
        .unwrap_or_default();
    let access_token = config.network.access_token.as_deref().unwrap_or("");

    format!(
        r#"[cache]
; Root directory of the disk cache. One folder per tileset is created below it.
directory = {}
; Extension of cached image files (default: png)
file_extension = {}
; Maximum number of tiles kept in memory. Empty or 0 keeps every tile.
memory_max_entries = {}

[scheduler]
; Maximum number of network fetches running at once (default: 3)
active_task_limit = {}
; Ticks a queued fetch waits before it may start. Rapid pans replace
; queued fetches during this window. 0 disables it (default: 15)
grace_ticks = {}
; Scheduler and disk cache tick interval in milliseconds (default: 16)
tick_interval_ms = {}

[network]
; Mapbox access token, appended to Mapbox tile URLs
; Get one at: https://www.mapbox.com/
access_token = {}
; HTTP request timeout in seconds (default: 30)
timeout = {}
; Lifetime in seconds of tiles served without caching headers (default: 43200)
default_ttl = {}
user_agent = {}

[logging]
; Log directory and file name. The file is truncated on every start.
directory = {}
file = {}
"#,
        path_to_string(&config.cache.directory),
        config.cache.file_extension,
        memory_max_entries,
        config.scheduler.active_task_limit,
        config.scheduler.grace_ticks,
        config.scheduler.tick_interval_ms,
        access_token,
        config.network.timeout,
        config.network.default_ttl,
        config.network.user_agent,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Displays `path`, abbreviating the home directory to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_section_is_written() {
        let content = to_config_string(&ConfigFile::default());
        for section in ["[cache]", "[scheduler]", "[network]", "[logging]"] {
            assert!(content.contains(section), "missing {section}");
        }
        assert!(content.contains("access_token = \n"));
    }
}
