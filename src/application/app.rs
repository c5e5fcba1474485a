use crate::auth::{AuthServiceClient, AuthTokenProvider};
use crate::cache::{
    BackoffPolicy, CacheKeyPolicy, CacheStore, HtmlCacheConfig, HtmlCacheService,
    InMemoryCacheStore, RedisCacheStore,
};
use crate::config::{CacheBackendKind, ConfigError, Settings};
use crate::proxy::types::{BackendKind, BodySizeLimit, ProxyConfig, TargetUrl};
use crate::proxy::{
    BackendForwarder, EdgeService, GatewayDispatcher, IdentityConfig, OriginDispatcher,
    ProxyMiddlewareConfig,
};
use crate::{Error, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    cache: Arc<HtmlCacheService>,
    router: Router,
}

impl Application {
    #[instrument(skip(settings))]
    pub async fn new(settings: Settings) -> Result<Self> {
        let store = connect_store(&settings)?;
        let cache = Arc::new(cache_service(&settings, store));
        let router = edge_router(&settings, Arc::clone(&cache))?;

        Ok(Self {
            settings,
            cache,
            router,
        })
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let address = self.settings.listen_address();
        let listener = TcpListener::bind(&address).await?;

        info!(
            address = %address,
            environment = %self.settings.application.environment,
            origin = %self.settings.upstream.origin_url,
            gateway = %self.settings.upstream.gateway_url,
            "Starting storefront edge"
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Draining queued cache writes");
        self.cache.flush().await;
        info!("Storefront edge stopped");

        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Build the HTML cache over `store` as configured in `settings`
pub fn cache_service(settings: &Settings, store: Arc<dyn CacheStore>) -> HtmlCacheService {
    HtmlCacheService::new(
        store,
        CacheKeyPolicy::new(&settings.cache.cacheable_paths),
        HtmlCacheConfig::from(&settings.cache),
    )
}

/// Assemble the complete edge router, middleware included
pub fn edge_router(settings: &Settings, cache: Arc<HtmlCacheService>) -> Result<Router> {
    let proxy_config = ProxyConfig {
        request_timeout: settings.upstream.request_timeout(),
        max_body_size: BodySizeLimit::try_new(settings.upstream.max_body_bytes).map_err(|e| {
            Error::Config(ConfigError::Message(format!("upstream.max_body_bytes: {e}")))
        })?,
        secure_cookies: settings.is_production(),
        warmup_token: settings.cache.warmup_token.clone(),
    };

    if proxy_config.warmup_token.as_deref().unwrap_or_default().is_empty() {
        warn!("No warmup token configured; cache warmup and purge are disabled");
    }

    let gateway = GatewayDispatcher::new(BackendForwarder::new(
        BackendKind::Gateway,
        target_url("gateway_url", &settings.upstream.gateway_url)?,
        proxy_config.request_timeout,
    ));
    let origin = OriginDispatcher::new(
        BackendForwarder::new(
            BackendKind::Origin,
            target_url("origin_url", &settings.upstream.origin_url)?,
            proxy_config.request_timeout,
        ),
        Arc::clone(&cache),
        &proxy_config,
    );

    let issuer = AuthServiceClient::new(
        &target_url("auth_service_url", &settings.auth.service_url)?,
        &settings.auth.api_prefix,
        &settings.auth.static_key,
        settings.auth.request_timeout(),
    );
    let identity = IdentityConfig {
        provider: AuthTokenProvider::new(Arc::new(issuer), settings.auth.cookie_safety_margin()),
        secure_cookies: proxy_config.secure_cookies,
    };

    let middleware = if settings.logging.request_logging {
        ProxyMiddlewareConfig::default()
    } else {
        ProxyMiddlewareConfig::default().disable_logging()
    };

    Ok(EdgeService::new(gateway, origin, cache).into_router(identity, middleware))
}

fn connect_store(settings: &Settings) -> Result<Arc<dyn CacheStore>> {
    match settings.cache.backend {
        CacheBackendKind::Redis => {
            let redis = &settings.redis;
            info!(host = %redis.host, port = redis.port, db = redis.db, "Connecting to Redis");
            let backoff = BackoffPolicy::new(
                std::time::Duration::from_millis(redis.reconnect_base_ms),
                std::time::Duration::from_millis(redis.reconnect_cap_ms),
                redis.reconnect_max_attempts,
            );
            let store = RedisCacheStore::connect(redis.connection_info(), backoff)?;
            Ok(Arc::new(store))
        }
        CacheBackendKind::Memory => {
            warn!("Using the in-process cache store; entries are not shared between instances");
            Ok(Arc::new(InMemoryCacheStore::new()))
        }
    }
}

fn target_url(name: &'static str, value: &str) -> Result<TargetUrl> {
    TargetUrl::try_new(value.to_string()).map_err(|_| Error::invalid_upstream(name, value))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let dir = tempfile::tempdir().unwrap();
        Settings::load(dir.path(), move |name| vars.get(name).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_application_builds_with_memory_store() {
        let mut settings = settings(&[("AUTH_SERVICE_URL", "http://auth.internal")]);
        settings.cache.backend = CacheBackendKind::Memory;

        let app = Application::new(settings).await.unwrap();
        assert_eq!(app.settings().application.port, 3000);
    }

    #[tokio::test]
    async fn test_invalid_upstream_is_rejected() {
        let settings = settings(&[
            ("AUTH_SERVICE_URL", "http://auth.internal"),
            ("ORIGIN_SERVER_URL", "origin-without-scheme"),
        ]);
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let cache = Arc::new(cache_service(&settings, store));

        let err = edge_router(&settings, cache).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidUpstream {
                name: "origin_url",
                ..
            }
        ));
    }
}
