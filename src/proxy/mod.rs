//! Proxy module for the storefront edge
//!
//! Every request is routed by path:
//! - `/api/*` is streamed to the API gateway
//! - everything else goes to the rendering origin, through the HTML cache

pub mod dispatch;
pub mod error_response;
pub mod forwarder;
pub mod headers;
pub mod health;
pub mod middleware;
pub mod middleware_stack;
pub mod service;
pub mod types;
pub mod url_resolver;

#[cfg(test)]
pub(crate) mod test_utils;


pub use dispatch::{GatewayDispatcher, OriginDispatcher};
pub use forwarder::{BackendForwarder, DispatchContext};
pub use middleware::IdentityConfig;
pub use middleware_stack::{ProxyMiddlewareConfig, ProxyMiddlewareStack};
pub use service::EdgeService;
pub use types::{ProxyConfig, ProxyError, ProxyResult};
