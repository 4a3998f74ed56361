//! Transport capability and its request/response types.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use thiserror::Error;

use crate::coord::CanonicalTileId;

/// Boxed future used by [`TileTransport`] so it stays dyn-compatible.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP status meaning the cached copy is still valid.
pub const STATUS_NOT_MODIFIED: u16 = 304;

/// Errors reported by a transport.
///
/// Cloneable so they can travel inside broadcast events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The body was not a decodable image.
    #[error("Failed to decode tile image: {0}")]
    Decode(String),

    /// No URL could be built for the tileset.
    #[error("Invalid tile URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be created.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// A request for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub tileset: String,
    pub tile: CanonicalTileId,
    pub use_retina: bool,
    /// Validator of the cached copy; empty when there is none.
    pub etag: String,
}

impl TileRequest {
    pub fn new(tileset: impl Into<String>, tile: CanonicalTileId, use_retina: bool) -> Self {
        Self {
            tileset: tileset.into(),
            tile,
            use_retina,
            etag: String::new(),
        }
    }

    /// Makes the request conditional on `etag`.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }

    pub fn is_conditional(&self) -> bool {
        !self.etag.is_empty()
    }
}

/// What a transport returned for a [`TileRequest`].
#[derive(Clone)]
pub struct TransportResponse {
    /// Encoded image bytes. Empty on 304 and on failures.
    pub data: Bytes,
    /// Decoded image, if decoding succeeded.
    pub image: Option<Arc<DynamicImage>>,
    pub etag: String,
    pub expires_at: DateTime<Utc>,
    /// HTTP-style status; `0` when no response was received.
    pub status: u16,
    pub errors: Vec<TransportError>,
}

impl TransportResponse {
    /// A response that carries only an error.
    pub fn failed(error: TransportError) -> Self {
        Self {
            data: Bytes::new(),
            image: None,
            etag: String::new(),
            expires_at: Utc::now(),
            status: 0,
            errors: vec![error],
        }
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == STATUS_NOT_MODIFIED
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("bytes", &self.data.len())
            .field("decoded", &self.image.is_some())
            .field("etag", &self.etag)
            .field("expires_at", &self.expires_at)
            .field("status", &self.status)
            .field("errors", &self.errors)
            .finish()
    }
}

/// Fetches tile bytes from somewhere.
///
/// Implementations report failures inside the response rather than as an
/// `Err`, so a partial result (for example bytes that failed to decode) can
/// still be inspected.
pub trait TileTransport: Send + Sync + 'static {
    fn fetch(&self, request: TileRequest) -> BoxFuture<'_, TransportResponse>;
}

impl<T: TileTransport + ?Sized> TileTransport for Arc<T> {
    fn fetch(&self, request: TileRequest) -> BoxFuture<'_, TransportResponse> {
        (**self).fetch(request)
    }
}
