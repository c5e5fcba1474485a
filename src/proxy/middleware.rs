//! Middleware implementations for the proxy service

use crate::auth::cookies::append_token_cookies;
use crate::auth::AuthTokenProvider;
use crate::proxy::headers::{paths, X_REQUEST_ID};
use crate::proxy::health::is_health_check;
use crate::proxy::types::RequestId;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for the identity middleware
#[derive(Clone)]
pub struct IdentityConfig {
    pub provider: AuthTokenProvider,
    /// Adds `Secure` to identity cookies
    pub secure_cookies: bool,
}

/// Request ID middleware - ensures every request has a unique ID for tracing
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Keep a well-formed inbound ID, otherwise mint a v7 one
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .map(RequestId::new)
        .unwrap_or_else(RequestId::generate);

    let header_value = HeaderValue::from_str(&request_id.to_string()).ok();

    if let Some(value) = &header_value {
        request.headers_mut().insert(X_REQUEST_ID, value.clone());
    }

    let mut response = next.run(request).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    response
}

/// Logging middleware - logs request/response details with timing
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    debug!(
        request_id = request_id,
        method = %method,
        path = %uri.path(),
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        request_id = request_id,
        method = %method,
        path = %uri.path(),
        status = response.status().as_u16(),
        cache = response
            .headers()
            .get(crate::proxy::headers::X_CACHE)
            .and_then(|h| h.to_str().ok()),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

/// Makes sure failed responses can be correlated with the request
pub async fn error_handling_middleware(request: Request, next: Next) -> Response {
    let request_id = request.headers().get(X_REQUEST_ID).cloned();

    let mut response = next.run(request).await;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        warn!(
            request_id = request_id.as_ref().and_then(|h| h.to_str().ok()),
            status = status.as_u16(),
            "Request failed"
        );
        if let Some(id) = request_id {
            response.headers_mut().entry(X_REQUEST_ID).or_insert(id);
        }
    }
    response
}

/// Identity middleware - resolves the visitor's token and sets cookies for new ones.
///
/// Health checks and the cache admin endpoint skip token resolution entirely.
/// The resolved token travels to the handler as a request extension.
pub async fn identity_middleware(
    State(config): State<Arc<IdentityConfig>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if is_health_check(path, request.headers()) || path == paths::CACHE_ADMIN {
        return next.run(request).await;
    }

    let resolved = config.provider.resolve(request.headers()).await;
    let minted = if resolved.minted {
        resolved.token.clone()
    } else {
        None
    };
    request.extensions_mut().insert(resolved);

    let mut response = next.run(request).await;

    if let Some(token) = minted {
        append_token_cookies(response.headers_mut(), &token, config.secure_cookies);
    }

    response
}
