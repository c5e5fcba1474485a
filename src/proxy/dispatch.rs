//! Backend dispatchers
//!
//! The gateway dispatcher streams responses straight through. The origin
//! dispatcher layers the HTML cache on top: cacheable GETs are served from
//! the cache when possible, and fresh renders are buffered so they can be
//! stored.

use crate::cache::key_policy::is_partial_render;
use crate::cache::{CacheEntry, CacheRefresh, CacheWriteOptions, HtmlCacheService};
use crate::proxy::forwarder::{BackendForwarder, DispatchContext};
use crate::proxy::headers::{
    apply_proxy_headers, cache_status, set_cache_status, strip_hop_by_hop, ACCEPT_ENCODING,
    CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    X_CACHE_TTL, X_WARMUP_TOKEN,
};
use crate::proxy::types::*;
use axum::body::Body;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use http_body_util::{BodyExt, Limited};
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// Encodings the origin may use on the cache path
const CACHE_PATH_ACCEPT_ENCODING: &str = "gzip, deflate";

/// Values of `X-Cache-Reason`
pub mod skip_reasons {
    pub const METHOD: &str = "method";
    pub const PARTIAL_RENDER: &str = "partial-render";
    pub const NOT_CACHEABLE: &str = "not-cacheable";
    pub const STATUS: &str = "status";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const REJECTED: &str = "rejected";
    pub const LOCKED: &str = "locked";
    pub const STORE_UNAVAILABLE: &str = "store-unavailable";
}

/// Forwards `/api/*` traffic to the API gateway
#[derive(Clone)]
pub struct GatewayDispatcher {
    forwarder: BackendForwarder,
}

impl GatewayDispatcher {
    pub fn new(forwarder: BackendForwarder) -> Self {
        Self { forwarder }
    }

    pub async fn dispatch(
        &self,
        request: Request<Body>,
        context: &DispatchContext,
    ) -> ProxyResult<Response<Body>> {
        let response = self.forwarder.forward(request, context).await?;
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        apply_proxy_headers(&mut parts.headers, BackendKind::Gateway);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachePlan {
    Skip(&'static str),
    Lookup,
    Refresh,
}

/// Forwards page requests to the rendering origin, with HTML caching
#[derive(Clone)]
pub struct OriginDispatcher {
    forwarder: BackendForwarder,
    cache: Arc<HtmlCacheService>,
    max_body_size: BodySizeLimit,
    warmup_token: Option<String>,
}

impl OriginDispatcher {
    pub fn new(
        forwarder: BackendForwarder,
        cache: Arc<HtmlCacheService>,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            forwarder,
            cache,
            max_body_size: config.max_body_size,
            warmup_token: config.warmup_token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub async fn dispatch(
        &self,
        request: Request<Body>,
        context: &DispatchContext,
    ) -> ProxyResult<Response<Body>> {
        match self.plan(&request) {
            CachePlan::Skip(reason) => {
                let response = self.forwarder.forward(request, context).await?;
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                apply_proxy_headers(&mut parts.headers, BackendKind::Origin);
                skip(&mut parts.headers, reason);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            CachePlan::Lookup => {
                if let Some(entry) = self.cache.get(&context.host, request.uri()).await {
                    debug!(path = request.uri().path(), "Serving page from cache");
                    return Ok(self.hit_response(entry));
                }
                self.fetch_and_store(request, context, false).await
            }
            CachePlan::Refresh => self.fetch_and_store(request, context, true).await,
        }
    }

    fn plan(&self, request: &Request<Body>) -> CachePlan {
        if request.method() != Method::GET {
            return CachePlan::Skip(skip_reasons::METHOD);
        }
        if is_partial_render(request.uri()) {
            return CachePlan::Skip(skip_reasons::PARTIAL_RENDER);
        }
        if !self.cache.policy().is_cacheable_path(request.uri().path()) {
            return CachePlan::Skip(skip_reasons::NOT_CACHEABLE);
        }
        if self.is_warmup(request.headers()) {
            return CachePlan::Refresh;
        }
        CachePlan::Lookup
    }

    /// Whether the request carries the configured warmup token
    pub fn is_warmup(&self, headers: &HeaderMap) -> bool {
        match (&self.warmup_token, headers.get(X_WARMUP_TOKEN)) {
            (Some(expected), Some(given)) => given.as_bytes() == expected.as_bytes(),
            _ => false,
        }
    }

    fn hit_response(&self, entry: CacheEntry) -> Response<Body> {
        let mut response = Response::new(Body::from(entry.content));
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&entry.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        if let Ok(value) =
            HeaderValue::from_str(&format!("public, max-age={}", self.cache.ttl().as_secs()))
        {
            headers.insert(CACHE_CONTROL, value);
        }
        if let Some(value) = entry.etag.and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(ETAG, value);
        }
        if let Some(value) = entry
            .content_language
            .and_then(|v| HeaderValue::from_str(&v).ok())
        {
            headers.insert(CONTENT_LANGUAGE, value);
        }
        apply_proxy_headers(headers, BackendKind::Origin);
        set_cache_status(headers, cache_status::HIT, None);

        response
    }

    async fn fetch_and_store(
        &self,
        mut request: Request<Body>,
        context: &DispatchContext,
        refresh: bool,
    ) -> ProxyResult<Response<Body>> {
        let uri = request.uri().clone();
        request.headers_mut().insert(
            ACCEPT_ENCODING,
            HeaderValue::from_static(CACHE_PATH_ACCEPT_ENCODING),
        );

        let timeout = self.forwarder.timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let response = self.forwarder.forward(request, context).await?;
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        apply_proxy_headers(&mut parts.headers, BackendKind::Origin);

        let limit = *self.max_body_size.as_ref();
        let raw = tokio::time::timeout_at(deadline, Limited::new(body, limit).collect())
            .await
            .map_err(|_| ProxyError::service_timeout(BackendKind::Origin, timeout))?
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    ProxyError::external_service(
                        BackendKind::Origin,
                        format!("response body exceeds {limit} bytes"),
                    )
                } else {
                    ProxyError::service_unavailable(BackendKind::Origin, e)
                }
            })?
            .to_bytes();

        let body = match decode_body(&parts.headers, &raw, limit) {
            Ok(Some(decoded)) => {
                parts.headers.remove(CONTENT_ENCODING);
                parts.headers.remove(CONTENT_LENGTH);
                decoded
            }
            Ok(None) => raw,
            Err(err) => {
                warn!(error = %err, path = uri.path(), "Could not decode origin response");
                skip(&mut parts.headers, skip_reasons::REJECTED);
                return Ok(Response::from_parts(parts, Body::from(raw)));
            }
        };

        let reason = if !parts.status.is_success() {
            Some(skip_reasons::STATUS)
        } else if !is_html(&parts.headers) {
            Some(skip_reasons::CONTENT_TYPE)
        } else {
            None
        };
        if let Some(reason) = reason {
            skip(&mut parts.headers, reason);
            return Ok(Response::from_parts(parts, Body::from(body)));
        }

        let Ok(content) = std::str::from_utf8(&body) else {
            skip(&mut parts.headers, skip_reasons::REJECTED);
            return Ok(Response::from_parts(parts, Body::from(body)));
        };

        let content_type = header_string(&parts.headers, CONTENT_TYPE.as_str())
            .unwrap_or_else(|| crate::proxy::headers::content_types::TEXT_HTML.to_string());
        let options = CacheWriteOptions {
            status: parts.status,
            etag: header_string(&parts.headers, ETAG.as_str()),
            content_language: header_string(&parts.headers, CONTENT_LANGUAGE.as_str()),
        };

        if refresh {
            let outcome = self
                .cache
                .refresh(&context.host, &uri, content, &content_type, options)
                .await;
            match outcome {
                CacheRefresh::Stored => {
                    set_cache_status(&mut parts.headers, cache_status::REFRESH, None)
                }
                CacheRefresh::Contended => skip(&mut parts.headers, skip_reasons::LOCKED),
                CacheRefresh::Rejected => skip(&mut parts.headers, skip_reasons::REJECTED),
                CacheRefresh::Failed => skip(&mut parts.headers, skip_reasons::STORE_UNAVAILABLE),
            }
        } else if !self.cache.is_ready() {
            skip(&mut parts.headers, skip_reasons::STORE_UNAVAILABLE);
        } else if self
            .cache
            .set(&context.host, &uri, content, &content_type, options)
            .await
        {
            set_cache_status(&mut parts.headers, cache_status::MISS, None);
            parts
                .headers
                .insert(X_CACHE_TTL, HeaderValue::from(self.cache.ttl().as_secs()));
        } else {
            skip(&mut parts.headers, skip_reasons::REJECTED);
        }

        Ok(Response::from_parts(parts, Body::from(body)))
    }
}

fn skip(headers: &mut HeaderMap, reason: &'static str) {
    set_cache_status(headers, cache_status::SKIP, Some(reason));
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("text/html"))
}

/// Decode a `gzip` or `deflate` body, refusing to expand past `limit` bytes.
///
/// `Ok(None)` means the body was not encoded (or used an encoding left alone).
fn decode_body(
    headers: &HeaderMap,
    raw: &Bytes,
    limit: usize,
) -> std::io::Result<Option<Bytes>> {
    let Some(encoding) = headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
    else {
        return Ok(None);
    };

    let decoded = match encoding.as_str() {
        "gzip" | "x-gzip" => read_limited(GzDecoder::new(&raw[..]), limit)?,
        // Most servers send zlib-wrapped deflate; some send it raw
        "deflate" => read_limited(ZlibDecoder::new(&raw[..]), limit)
            .or_else(|_| read_limited(DeflateDecoder::new(&raw[..]), limit))?,
        _ => return Ok(None),
    };
    Ok(Some(Bytes::from(decoded)))
}

fn read_limited(reader: impl Read, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut decoded)?;
    if decoded.len() > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("decoded body exceeds {limit} bytes"),
        ));
    }
    Ok(decoded)
}
