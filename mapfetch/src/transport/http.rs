//! HTTP transport using reqwest.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderMap, CACHE_CONTROL, ETAG, EXPIRES, IF_NONE_MATCH};
use tracing::{debug, trace, warn};

use super::types::{
    BoxFuture, TileRequest, TileTransport, TransportError, TransportResponse, STATUS_NOT_MODIFIED,
};
use super::url::TileUrl;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("mapfetch/", env!("CARGO_PKG_VERSION"));

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime given to responses without caching headers.
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub default_ttl: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            timeout: DEFAULT_TIMEOUT,
            default_ttl: DEFAULT_TTL,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Fetches tiles over HTTP(S).
///
/// Sends `If-None-Match` for conditional requests and derives the expiry
/// from `Cache-Control: max-age`, then `Expires`, then the default TTL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    urls: TileUrl,
    default_ttl: Duration,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            urls: TileUrl::new(config.access_token),
            default_ttl: config.default_ttl,
        })
    }

    async fn fetch_tile(&self, request: TileRequest) -> TransportResponse {
        let url = match self.urls.build(&request.tileset, &request.tile, request.use_retina) {
            Ok(url) => url,
            Err(e) => return TransportResponse::failed(e),
        };
        trace!(url = %url, conditional = request.is_conditional(), "HTTP GET tile");

        let mut builder = self.client.get(&url);
        if request.is_conditional() {
            builder = builder.header(IF_NONE_MATCH, request.etag.as_str());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    url = %url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return TransportResponse::failed(TransportError::Http(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let etag = header_str(&headers, ETAG)
            .map(str::to_string)
            .unwrap_or_else(|| request.etag.clone());
        let expires_at = expiry_from_headers(&headers, Utc::now(), self.default_ttl);

        if status == STATUS_NOT_MODIFIED {
            debug!(url = %url, "Tile not modified");
            return TransportResponse {
                data: Bytes::new(),
                image: None,
                etag,
                expires_at,
                status,
                errors: Vec::new(),
            };
        }

        if !response.status().is_success() {
            warn!(url = %url, status, "HTTP error status");
            return TransportResponse {
                status,
                ..TransportResponse::failed(TransportError::Status { status, url })
            };
        }

        let data = match response.bytes().await {
            Ok(data) => data,
            Err(e) => {
                return TransportResponse {
                    status,
                    ..TransportResponse::failed(TransportError::Http(format!(
                        "Failed to read response: {}",
                        e
                    )))
                };
            }
        };

        let (image, errors) = decode(data.clone()).await;
        debug!(url = %url, status, bytes = data.len(), "Tile downloaded");

        TransportResponse {
            data,
            image,
            etag,
            expires_at,
            status,
            errors,
        }
    }
}

impl TileTransport for HttpTransport {
    fn fetch(&self, request: TileRequest) -> BoxFuture<'_, TransportResponse> {
        Box::pin(self.fetch_tile(request))
    }
}

/// Decodes off the async workers.
async fn decode(
    data: Bytes,
) -> (
    Option<Arc<image::DynamicImage>>,
    Vec<TransportError>,
) {
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&data)).await;
    match decoded {
        Ok(Ok(image)) => (Some(Arc::new(image)), Vec::new()),
        Ok(Err(e)) => (None, vec![TransportError::Decode(e.to_string())]),
        Err(e) => (None, vec![TransportError::Decode(e.to_string())]),
    }
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Expiry from `Cache-Control: max-age`, then `Expires`, then `default_ttl`.
pub(crate) fn expiry_from_headers(
    headers: &HeaderMap,
    now: DateTime<Utc>,
    default_ttl: Duration,
) -> DateTime<Utc> {
    let max_age = header_str(headers, CACHE_CONTROL).and_then(|value| {
        value
            .split(',')
            .filter_map(|directive| directive.trim().strip_prefix("max-age="))
            .find_map(|secs| secs.trim_matches('"').parse::<i64>().ok())
    });
    if let Some(secs) = max_age {
        return now + ChronoDuration::seconds(secs.max(0));
    }

    if let Some(expires) = header_str(headers, EXPIRES)
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
    {
        return expires.with_timezone(&Utc);
    }

    now + ChronoDuration::from_std(default_ttl).unwrap_or_else(|_| ChronoDuration::hours(12))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(reqwest::header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_expiry_prefers_max_age() {
        let now = Utc::now();
        let map = headers(&[
            (CACHE_CONTROL, "public, max-age=3600"),
            (EXPIRES, "Wed, 21 Oct 2015 07:28:00 GMT"),
        ]);
        assert_eq!(
            expiry_from_headers(&map, now, DEFAULT_TTL),
            now + ChronoDuration::seconds(3600)
        );
    }

    #[test]
    fn test_expiry_falls_back_to_expires() {
        let now = Utc::now();
        let map = headers(&[(EXPIRES, "Wed, 21 Oct 2015 07:28:00 GMT")]);
        let expiry = expiry_from_headers(&map, now, DEFAULT_TTL);
        assert_eq!(expiry.to_rfc3339(), "2015-10-21T07:28:00+00:00");
    }

    #[test]
    fn test_expiry_defaults_to_ttl() {
        let now = Utc::now();
        let map = headers(&[(CACHE_CONTROL, "no-transform")]);
        assert_eq!(
            expiry_from_headers(&map, now, Duration::from_secs(60)),
            now + ChronoDuration::seconds(60)
        );
    }

    #[tokio::test]
    async fn test_invalid_tileset_fails_without_network() {
        let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
        let response = transport
            .fetch(TileRequest::new(
                "mapbox://styles/broken",
                crate::coord::CanonicalTileId::new(1, 0, 0),
                false,
            ))
            .await;
        assert!(matches!(
            response.errors.as_slice(),
            [TransportError::InvalidUrl(_)]
        ));
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        let (image, errors) = decode(Bytes::from_static(b"definitely not a png")).await;
        assert!(image.is_none());
        assert!(matches!(errors.as_slice(), [TransportError::Decode(_)]));
    }
}
