//! Loading and saving `<config dir>/mapfetch/config.ini`.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

pub use super::settings::ConfigFile;

/// Name of the configuration file inside [`config_directory`].
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Loads the configuration from [`config_file_path`].
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads the configuration from `path`.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Writes a commented INI file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Writes the default file if none exists. Returns its path.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }
}

/// `<user config dir>/mapfetch`.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mapfetch")
}

/// `<user config dir>/mapfetch/config.ini`.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_FILE_EXTENSION;
    use crate::scheduler::DEFAULT_ACTIVE_TASK_LIMIT;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert_eq!(config.cache.file_extension, DEFAULT_FILE_EXTENSION);
        assert!(config.cache.memory_max_entries.is_none());
        assert_eq!(config.scheduler.active_task_limit, DEFAULT_ACTIVE_TASK_LIMIT);
        assert!(config.network.access_token.is_none());
        assert_eq!(config.logging.file, "mapfetch.log");
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = ConfigFile::default();
        config.cache.directory = temp_dir.path().join("tiles");
        config.cache.memory_max_entries = Some(512);
        config.scheduler.grace_ticks = 0;
        config.network.access_token = Some("pk.test".to_string());
        config.network.timeout = 5;
        config.logging.file = "fetch.log".to_string();

        config.save_to(&config_path).unwrap();
        let loaded = ConfigFile::load_from(&config_path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[scheduler]\nactive_task_limit = many\n").unwrap();

        let err = ConfigFile::load_from(&config_path).unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref section, ref key, .. }
                if section == "scheduler" && key == "active_task_limit"
        ));
        assert!(err.to_string().contains("scheduler.active_task_limit = 'many'"));
    }
}
