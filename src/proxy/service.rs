//! Main proxy service implementation
//!
//! The `EdgeService` is the main entry point for the storefront edge.
//! It owns the two dispatchers and the shared HTML cache, and wires them
//! into an Axum router behind the middleware stack.
//!
//! ## Service Lifecycle
//!
//! ```rust,ignore
//! use storefront_edge::proxy::{EdgeService, IdentityConfig, ProxyMiddlewareConfig};
//!
//! // 1. Create service from the dispatchers and cache
//! let service = EdgeService::new(gateway, origin, cache);
//!
//! // 2. Convert to Axum router
//! let router = service.into_router(identity, ProxyMiddlewareConfig::default());
//!
//! // 3. Serve with Axum, keeping the peer address for X-Forwarded-For
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

use crate::auth::ResolvedToken;
use crate::cache::HtmlCacheService;
use crate::proxy::dispatch::{GatewayDispatcher, OriginDispatcher};
use crate::proxy::forwarder::DispatchContext;
use crate::proxy::headers::paths;
use crate::proxy::health::HealthReport;
use crate::proxy::middleware::IdentityConfig;
use crate::proxy::middleware_stack::ProxyMiddlewareConfig;
use crate::proxy::types::*;
use crate::proxy::url_resolver::UrlResolver;
use axum::{
    body::Body,
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::{delete, get},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Routes every request to the gateway or the origin
pub struct EdgeService {
    gateway: GatewayDispatcher,
    origin: OriginDispatcher,
    cache: Arc<HtmlCacheService>,
}

impl EdgeService {
    pub fn new(
        gateway: GatewayDispatcher,
        origin: OriginDispatcher,
        cache: Arc<HtmlCacheService>,
    ) -> Self {
        Self {
            gateway,
            origin,
            cache,
        }
    }

    pub fn cache(&self) -> Arc<HtmlCacheService> {
        Arc::clone(&self.cache)
    }

    /// Create an Axum router for the edge service with middleware
    pub fn into_router(
        self,
        identity: IdentityConfig,
        middleware: ProxyMiddlewareConfig,
    ) -> axum::Router {
        let router = paths::HEALTH
            .iter()
            .fold(axum::Router::new(), |router, path| {
                router.route(path, get(health_handler))
            })
            .route(paths::CACHE_ADMIN, delete(purge_handler))
            .fallback(proxy_handler)
            .with_state(Arc::new(self));

        middleware.build_stack(identity).apply_to_router(router)
    }
}

/// Axum handler for proxying requests
async fn proxy_handler(
    State(edge): State<Arc<EdgeService>>,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let error_context =
        ErrorContext::new(request.method(), request.uri(), request.headers(), peer_ip);
    let access_token = request
        .extensions()
        .get::<ResolvedToken>()
        .and_then(|resolved| resolved.access_token().map(str::to_string));
    let context = DispatchContext::new(request.headers(), request.uri(), peer_ip)
        .with_access_token(access_token);

    let result = if UrlResolver::is_gateway_path(request.uri().path()) {
        edge.gateway.dispatch(request, &context).await
    } else {
        edge.origin.dispatch(request, &context).await
    };

    result.map_err(|err| err.with_context(error_context))
}

/// Health check handler
async fn health_handler(State(edge): State<Arc<EdgeService>>) -> Json<HealthReport> {
    Json(HealthReport::collect(&edge.cache).await)
}

#[derive(Debug, Deserialize)]
struct PurgeParams {
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct PurgeResponse {
    success: bool,
    data: PurgeOutcome,
}

#[derive(Debug, Serialize)]
struct PurgeOutcome {
    path: String,
    host: String,
    deleted: bool,
}

/// Drops one cached page; guarded by the warmup token
async fn purge_handler(
    State(edge): State<Arc<EdgeService>>,
    Query(params): Query<PurgeParams>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<PurgeResponse>, ProxyError> {
    if !edge.origin.is_warmup(&headers) {
        let context = ErrorContext::new(&method, &uri, &headers, None);
        return Err(
            ProxyError::unauthorized("A valid warmup token is required").with_context(context)
        );
    }

    let path = params
        .path
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| DEFAULT_PATH.to_string());
    let host = UrlResolver::request_host(&headers, &uri);
    let deleted = edge.cache.delete_path(&host, &path).await;
    info!(host = %host, path = %path, deleted, "Cache purge requested");

    Ok(Json(PurgeResponse {
        success: true,
        data: PurgeOutcome {
            path,
            host,
            deleted,
        },
    }))
}
