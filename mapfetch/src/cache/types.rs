//! Cache entry and error types shared by the memory and disk tiers.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error while reading or writing cache files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes could not be decoded as an image.
    #[error("Failed to decode cached image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Metadata sidecar could not be serialized.
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// The blocking worker running the I/O went away.
    #[error("Disk worker failed: {0}")]
    Worker(String),
}

/// A cached tile image.
///
/// `data` is never mutated once the entry exists; an update replaces the
/// whole entry. Cloning is cheap (shared bytes and shared decoded image).
#[derive(Clone)]
pub struct CacheEntry {
    /// Encoded image bytes as received from the network.
    pub data: Bytes,

    /// Decoded image, when one is available.
    pub image: Option<Arc<DynamicImage>>,

    /// Validator for conditional revalidation (`If-None-Match`).
    pub etag: String,

    /// When this entry should be revalidated.
    pub expires_at: DateTime<Utc>,

    /// Backing file, set once the disk tier has persisted the entry.
    pub file_path: Option<PathBuf>,
}

impl CacheEntry {
    /// Creates an entry without a decoded image or file path.
    pub fn new(data: impl Into<Bytes>, etag: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            data: data.into(),
            image: None,
            etag: etag.into(),
            expires_at,
            file_path: None,
        }
    }

    /// Attaches a decoded image.
    pub fn with_image(mut self, image: Arc<DynamicImage>) -> Self {
        self.image = Some(image);
        self
    }

    /// Returns true if the entry expired before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Returns true if the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Size of the encoded payload.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Metadata persisted next to the image file.
    pub fn metadata(&self) -> TileMetadata {
        TileMetadata {
            etag: self.etag.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("bytes", &self.data.len())
            .field("decoded", &self.image.is_some())
            .field("etag", &self.etag)
            .field("expires_at", &self.expires_at)
            .field("file_path", &self.file_path)
            .finish()
    }
}

/// ETag and expiration stored in the `.json` sidecar of a tile file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub etag: String,
    pub expires_at: DateTime<Utc>,
}

impl Default for TileMetadata {
    /// No validator and already expired, so the tile gets revalidated.
    fn default() -> Self {
        Self {
            etag: String::new(),
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Result of removing files from the disk cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
}

impl fmt::Display for ClearResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} files, freed {} bytes",
            self.files_deleted, self.bytes_freed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let fresh = CacheEntry::new(vec![1, 2, 3], "v1", now + Duration::hours(1));
        let stale = CacheEntry::new(vec![1, 2, 3], "v1", now - Duration::seconds(1));

        assert!(!fresh.is_expired_at(now));
        assert!(stale.is_expired_at(now));
    }

    #[test]
    fn test_default_metadata_is_stale() {
        let meta = TileMetadata::default();
        assert!(meta.etag.is_empty());
        assert!(meta.expires_at < Utc::now());
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let entry = CacheEntry::new(vec![9], "\"abc\"", Utc::now());
        let json = serde_json::to_string(&entry.metadata()).unwrap();
        let back: TileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry.metadata());
    }

    #[test]
    fn test_debug_omits_payload() {
        let entry = CacheEntry::new(vec![0u8; 4096], "", Utc::now());
        let debug = format!("{:?}", entry);
        assert!(debug.contains("4096"));
        assert!(debug.contains("decoded: false"));
    }

    #[test]
    fn test_clear_result_display() {
        let result = ClearResult {
            files_deleted: 3,
            bytes_freed: 1024,
        };
        assert_eq!(result.to_string(), "removed 3 files, freed 1024 bytes");
    }
}
