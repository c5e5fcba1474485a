//! Application assembly and lifecycle
//!
//! Builds the cache store, the HTML cache, the identity provider and both
//! dispatchers from [`crate::config::Settings`], then serves the edge router
//! until a shutdown signal arrives.

pub mod app;

pub use app::{cache_service, edge_router, Application};
