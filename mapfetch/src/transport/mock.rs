//! In-process transport for tests and offline runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::types::{
    BoxFuture, TileRequest, TileTransport, TransportError, TransportResponse, STATUS_NOT_MODIFIED,
};
use crate::coord::CanonicalTileId;

/// Transport serving canned responses and recording every request.
///
/// Responses are looked up per `(tileset, tile)`; anything not registered
/// gets the fallback response (a failure unless one was set).
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    responses: HashMap<(String, CanonicalTileId), TransportResponse>,
    fallback: Option<TransportResponse>,
    requests: Vec<TileRequest>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `response` for one tile.
    pub fn respond(&self, tileset: &str, tile: CanonicalTileId, response: TransportResponse) {
        self.inner
            .lock()
            .responses
            .insert((tileset.to_string(), tile), response);
    }

    /// Serves `response` for every tile without a specific response.
    pub fn respond_to_all(&self, response: TransportResponse) {
        self.inner.lock().fallback = Some(response);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TileRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// A 200 response carrying `data`, decoded if it is an image.
    pub fn ok(data: Vec<u8>, etag: &str, expires_at: DateTime<Utc>) -> TransportResponse {
        let image = image::load_from_memory(&data).ok().map(Arc::new);
        let errors = match image {
            Some(_) => Vec::new(),
            None => vec![TransportError::Decode("not an image".to_string())],
        };
        TransportResponse {
            data: data.into(),
            image,
            etag: etag.to_string(),
            expires_at,
            status: 200,
            errors,
        }
    }

    /// A 304 response.
    pub fn not_modified(etag: &str, expires_at: DateTime<Utc>) -> TransportResponse {
        TransportResponse {
            data: Default::default(),
            image: None,
            etag: etag.to_string(),
            expires_at,
            status: STATUS_NOT_MODIFIED,
            errors: Vec::new(),
        }
    }
}

impl TileTransport for MockTransport {
    fn fetch(&self, request: TileRequest) -> BoxFuture<'_, TransportResponse> {
        let response = {
            let mut state = self.inner.lock();
            let key = (request.tileset.clone(), request.tile);
            let response = state
                .responses
                .get(&key)
                .or(state.fallback.as_ref())
                .cloned()
                .unwrap_or_else(|| {
                    TransportResponse::failed(TransportError::Http(format!(
                        "no mock response for {}/{}",
                        request.tileset, request.tile
                    )))
                });
            state.requests.push(request);
            response
        };
        Box::pin(async move { response })
    }
}
