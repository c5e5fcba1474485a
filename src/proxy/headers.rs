//! HTTP header constants and utilities for the proxy service
//!
//! This module centralizes all HTTP header names and header-related
//! constants used throughout the proxy service to ensure consistency
//! and make maintenance easier.

use crate::proxy::types::BackendKind;
use ::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Cache outcome for the response: HIT, MISS, SKIP or REFRESH
pub const X_CACHE: &str = "x-cache";

/// Why a response was not served from or written to the cache
pub const X_CACHE_REASON: &str = "x-cache-reason";

/// TTL in seconds of the entry written on a miss
pub const X_CACHE_TTL: &str = "x-cache-ttl";

pub const X_PROXY_SERVER: &str = "x-proxy-server";
pub const X_PROXY_TARGET: &str = "x-proxy-target";
pub const X_PROXY_TIMESTAMP: &str = "x-proxy-timestamp";

/// Marks requests that passed through this proxy on their way upstream
pub const X_PROXY_SOURCE: &str = "x-proxy-source";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

pub const X_ERROR_CODE: &str = "x-error-code";
pub const X_ERROR_TIMESTAMP: &str = "x-error-timestamp";

/// Carries the shared secret for cache warmup and purge
pub const X_WARMUP_TOKEN: &str = "x-warmup-token";

/// Value of `X-Proxy-Server` and `X-Proxy-Source`
pub const PROXY_SERVER_NAME: &str = "storefront-edge";

pub const KEEP_ALIVE: &str = "keep-alive";
pub const KEEP_ALIVE_VALUE: &str = "timeout=60, max=1000";

/// Standard header re-exports for convenience
pub use header::{
    ACCEPT_ENCODING, AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_ENCODING,
    CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, ETAG, HOST, SET_COOKIE, USER_AGENT,
};

/// Well-known paths
pub mod paths {
    /// Health check endpoints answered by the proxy itself
    pub const HEALTH: &[&str] = &["/health", "/healthz", "/_health"];

    /// Cache administration endpoint
    pub const CACHE_ADMIN: &str = "/__edge/cache";
}

/// Values of the `X-Cache` header
pub mod cache_status {
    pub const HIT: &str = "HIT";
    pub const MISS: &str = "MISS";
    pub const SKIP: &str = "SKIP";
    pub const REFRESH: &str = "REFRESH";
}

/// Common content types
pub mod content_types {
    pub const APPLICATION_JSON: &str = "application/json";
    pub const TEXT_HTML: &str = "text/html; charset=utf-8";
}

/// Hop-by-hop headers (RFC 7230 section 6.1) never forwarded in either direction
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Remove every hop-by-hop header from `headers`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let hop_by_hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(name);
    }
}

/// Tag a response with the proxy metadata and connection headers
pub fn apply_proxy_headers(headers: &mut HeaderMap, target: BackendKind) {
    let timestamp = chrono::Utc::now().to_rfc3339();

    headers.insert(X_PROXY_SERVER, HeaderValue::from_static(PROXY_SERVER_NAME));
    headers.insert(
        X_PROXY_TARGET,
        HeaderValue::from_static(match target {
            BackendKind::Origin => "origin",
            BackendKind::Gateway => "gateway",
        }),
    );
    if let Ok(value) = HeaderValue::from_str(&timestamp) {
        headers.insert(X_PROXY_TIMESTAMP, value);
    }
    headers.insert(CONNECTION, HeaderValue::from_static(KEEP_ALIVE));
    headers.insert(KEEP_ALIVE, HeaderValue::from_static(KEEP_ALIVE_VALUE));
}

/// Record the cache outcome on a response
pub fn set_cache_status(
    headers: &mut HeaderMap,
    status: &'static str,
    reason: Option<&'static str>,
) {
    headers.insert(X_CACHE, HeaderValue::from_static(status));
    if let Some(reason) = reason {
        headers.insert(X_CACHE_REASON, HeaderValue::from_static(reason));
    }
}
