//! INI parsing: the single place where INI keys map to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parses an `Ini` into a `ConfigFile`, overlaying the values found onto
/// `ConfigFile::default()`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = non_empty(section.get("directory")) {
            config.cache.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("file_extension")) {
            let v = v.trim_start_matches('.');
            if v.is_empty() || v.contains(['/', '\\']) {
                return Err(invalid(
                    "cache",
                    "file_extension",
                    v,
                    "must be a plain extension such as 'png'",
                ));
            }
            config.cache.file_extension = v.to_string();
        }
        if let Some(v) = non_empty(section.get("memory_max_entries")) {
            let entries: u64 = parse_number(
                "cache",
                "memory_max_entries",
                v,
                "must be a non-negative integer (0 or empty for unbounded)",
            )?;
            config.cache.memory_max_entries = (entries > 0).then_some(entries);
        }
    }

    // [scheduler]
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = non_empty(section.get("active_task_limit")) {
            config.scheduler.active_task_limit =
                parse_positive("scheduler", "active_task_limit", v)?;
        }
        if let Some(v) = non_empty(section.get("grace_ticks")) {
            config.scheduler.grace_ticks = parse_number(
                "scheduler",
                "grace_ticks",
                v,
                "must be a non-negative integer (0 disables the grace window)",
            )?;
        }
        if let Some(v) = non_empty(section.get("tick_interval_ms")) {
            config.scheduler.tick_interval_ms = parse_positive("scheduler", "tick_interval_ms", v)?;
        }
    }

    // [network]
    if let Some(section) = ini.section(Some("network")) {
        if let Some(v) = non_empty(section.get("access_token")) {
            config.network.access_token = Some(v.to_string());
        }
        if let Some(v) = non_empty(section.get("timeout")) {
            config.network.timeout = parse_positive("network", "timeout", v)?;
        }
        if let Some(v) = non_empty(section.get("default_ttl")) {
            config.network.default_ttl = parse_number(
                "network",
                "default_ttl",
                v,
                "must be a non-negative integer (seconds)",
            )?;
        }
        if let Some(v) = non_empty(section.get("user_agent")) {
            config.network.user_agent = v.to_string();
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section.get("directory")) {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section.get("file")) {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

/// Expands a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_positive<T: FromStr + PartialOrd + Default>(
    section: &str,
    key: &str,
    value: &str,
) -> Result<T, ConfigFileError> {
    const REASON: &str = "must be a positive integer";
    let parsed: T = parse_number(section, key, value, REASON)?;
    if parsed <= T::default() {
        return Err(invalid(section, key, value, REASON));
    }
    Ok(parsed)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
