//! Application error types.

use std::fmt;

use crate::cache::CacheError;
use crate::config::ConfigFileError;
use crate::transport::TransportError;

/// Errors that can occur while starting the pipeline.
#[derive(Debug)]
pub enum AppError {
    /// The configuration file could not be loaded.
    Config(ConfigFileError),

    /// The disk cache root could not be prepared.
    DiskCache(CacheError),

    /// The HTTP client could not be built.
    Transport(TransportError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::DiskCache(e) => write!(f, "Failed to open disk cache: {}", e),
            AppError::Transport(e) => write!(f, "Failed to create HTTP transport: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::DiskCache(e) => Some(e),
            AppError::Transport(e) => Some(e),
        }
    }
}

impl From<ConfigFileError> for AppError {
    fn from(e: ConfigFileError) -> Self {
        AppError::Config(e)
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::DiskCache(e)
    }
}

impl From<TransportError> for AppError {
    fn from(e: TransportError) -> Self {
        AppError::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config(ConfigFileError::WriteError("read-only".to_string()));
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_app_error_from_transport_error() {
        let app_err: AppError = TransportError::Client("tls".to_string()).into();
        assert!(matches!(app_err, AppError::Transport(_)));
        assert!(app_err.source().is_some());
    }
}
