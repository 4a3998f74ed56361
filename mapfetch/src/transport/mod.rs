//! Network transport for tile bytes.
//!
//! The fetcher only depends on the [`TileTransport`] trait. [`HttpTransport`]
//! is the production implementation; [`MockTransport`] serves canned
//! responses.
//!
//! # Example
//!
//! ```ignore
//! use mapfetch::transport::{HttpTransport, HttpTransportConfig, TileRequest, TileTransport};
//!
//! let transport = HttpTransport::new(HttpTransportConfig::default())?;
//! let response = transport
//!     .fetch(TileRequest::new("mapbox.satellite", tile, false))
//!     .await;
//! ```

mod http;
mod mock;
mod types;
mod url;

pub use http::{
    HttpTransport, HttpTransportConfig, DEFAULT_TIMEOUT, DEFAULT_TTL, DEFAULT_USER_AGENT,
};
pub use mock::MockTransport;
pub use types::{
    BoxFuture, TileRequest, TileTransport, TransportError, TransportResponse, STATUS_NOT_MODIFIED,
};
pub use url::TileUrl;
