//! Middleware stack builder for clean composition
//!
//! This module provides a builder pattern for composing the Tower middleware stack,
//! making it easier to maintain and test the middleware pipeline.

use crate::proxy::error_response::panic_response;
use crate::proxy::middleware::*;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

/// Builder for composing the proxy middleware stack
pub struct ProxyMiddlewareStack {
    identity: Arc<IdentityConfig>,
    request_logging: bool,
}

impl ProxyMiddlewareStack {
    /// Create a new middleware stack builder
    pub fn new(identity: IdentityConfig) -> Self {
        Self {
            identity: Arc::new(identity),
            request_logging: true,
        }
    }

    /// Apply the complete middleware stack to a router
    ///
    /// The middleware are applied in the following order (outer to inner):
    /// 1. Request ID generation/propagation
    /// 2. Logging (with request ID)
    /// 3. Error handling
    /// 4. Panic recovery
    /// 5. Identity resolution
    pub fn apply_to_router<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = router
            .layer(from_fn_with_state(self.identity, identity_middleware))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(from_fn(error_handling_middleware));

        let router = if self.request_logging {
            router.layer(from_fn(logging_middleware))
        } else {
            router
        };

        router.layer(from_fn(request_id_middleware))
    }

    pub fn without_logging(mut self) -> Self {
        self.request_logging = false;
        self
    }
}

/// Configuration for the entire middleware stack
#[derive(Clone, Debug)]
pub struct ProxyMiddlewareConfig {
    /// Whether to log every completed request
    pub request_logging: bool,
}

impl Default for ProxyMiddlewareConfig {
    fn default() -> Self {
        Self {
            request_logging: true,
        }
    }
}

impl ProxyMiddlewareConfig {
    /// Create middleware stack from configuration
    pub fn build_stack(self, identity: IdentityConfig) -> ProxyMiddlewareStack {
        let stack = ProxyMiddlewareStack::new(identity);
        if self.request_logging {
            stack
        } else {
            stack.without_logging()
        }
    }

    /// Builder method to disable request logging
    pub fn disable_logging(mut self) -> Self {
        self.request_logging = false;
        self
    }
}
