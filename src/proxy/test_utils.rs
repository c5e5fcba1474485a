//! Test utilities for proxy module testing
//!
//! [`TestHarness`] wires a complete edge router against mockito stand-ins
//! for the origin, the API gateway and the auth service, with an in-memory
//! cache store behind it.

use crate::auth::{AuthServiceClient, AuthTokenProvider};
use crate::cache::{CacheKeyPolicy, HtmlCacheConfig, HtmlCacheService, InMemoryCacheStore};
use crate::proxy::dispatch::{GatewayDispatcher, OriginDispatcher};
use crate::proxy::forwarder::BackendForwarder;
use crate::proxy::headers::content_types::TEXT_HTML;
use crate::proxy::middleware::IdentityConfig;
use crate::proxy::middleware_stack::ProxyMiddlewareConfig;
use crate::proxy::service::EdgeService;
use crate::proxy::types::*;
use axum::body::Body;
use axum::http::{Request, Uri};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use mockito::{Mock, Server, ServerGuard};
use std::sync::Arc;
use std::time::Duration;

pub const WARMUP_TOKEN: &str = "warmup-secret";
pub const AUTH_API_PREFIX: &str = "/v1";
pub const GUEST_TOKEN_PATH: &str = "/v1/guest-token";
pub const CACHEABLE_PATHS: &[&str] = &["/", "/categories", "/products"];
pub const TEST_HOST: &str = "shop.example.com";

/// Create a test proxy configuration with sensible defaults
pub fn test_proxy_config() -> ProxyConfig {
    ProxyConfig {
        request_timeout: Duration::from_secs(5),
        max_body_size: BodySizeLimit::try_new(1024 * 1024).expect("1MB is valid"),
        secure_cookies: false,
        warmup_token: Some(WARMUP_TOKEN.to_string()),
    }
}

pub fn target(url: String) -> TargetUrl {
    TargetUrl::try_new(url).expect("mock server URL is valid")
}

/// A complete edge router in front of three mock backends
pub struct TestHarness {
    pub origin: ServerGuard,
    pub gateway: ServerGuard,
    pub auth: ServerGuard,
    pub store: Arc<InMemoryCacheStore>,
    pub cache: Arc<HtmlCacheService>,
    router: Router,
}

impl TestHarness {
    pub async fn new() -> Self {
        let origin = Server::new_async().await;
        let gateway = Server::new_async().await;
        let auth = Server::new_async().await;

        let config = test_proxy_config();
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = Arc::new(HtmlCacheService::new(
            store.clone(),
            CacheKeyPolicy::new(CACHEABLE_PATHS),
            HtmlCacheConfig::default(),
        ));

        let gateway_dispatcher = GatewayDispatcher::new(BackendForwarder::new(
            BackendKind::Gateway,
            target(gateway.url()),
            config.request_timeout,
        ));
        let origin_dispatcher = OriginDispatcher::new(
            BackendForwarder::new(
                BackendKind::Origin,
                target(origin.url()),
                config.request_timeout,
            ),
            cache.clone(),
            &config,
        );

        let issuer = AuthServiceClient::new(
            &target(auth.url()),
            AUTH_API_PREFIX,
            "static-key",
            Duration::from_secs(2),
        );
        let identity = IdentityConfig {
            provider: AuthTokenProvider::new(Arc::new(issuer), Duration::from_secs(60)),
            secure_cookies: config.secure_cookies,
        };

        let router = EdgeService::new(gateway_dispatcher, origin_dispatcher, cache.clone())
            .into_router(identity, ProxyMiddlewareConfig::default().disable_logging());

        Self {
            origin,
            gateway,
            auth,
            store,
            cache,
            router,
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Auth service answers every mint with `token`
    pub async fn mock_guest_token(&mut self, token: &str) -> Mock {
        self.auth
            .mock("POST", GUEST_TOKEN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(guest_token_body(token))
            .create_async()
            .await
    }

    /// Store a valid page for `path` on `host` and wait for the write
    pub async fn seed_page(&self, host: &str, path: &str) {
        let uri: Uri = path.parse().expect("valid path");
        let queued = self
            .cache
            .set(host, &uri, &page_html(path), TEXT_HTML, Default::default())
            .await;
        assert!(queued, "seed write for {path} was rejected");
        self.cache.flush().await;
    }
}

pub fn guest_token_body(token: &str) -> String {
    let now = Utc::now().timestamp();
    serde_json::json!({
        "success": true,
        "data": {
            "access_token": token,
            "role": "guest",
            "exp": now + 3600,
            "iat": now,
        }
    })
    .to_string()
}

/// A rendered page comfortably above the validator's minimum size
pub fn page_html(title: &str) -> String {
    let products: String = (1..=12)
        .map(|n| format!("<li class=\"product\">Product {n} on {title}</li>"))
        .collect();
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><title>{title}</title></head>\
         <body><main><h1>{title}</h1><ul>{products}</ul></main></body></html>"
    )
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", TEST_HOST)
        .body(Body::empty())
        .expect("valid request")
}

pub async fn text_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn json_body(response: Response) -> serde_json::Value {
    serde_json::from_str(&text_body(response).await).expect("json body")
}
