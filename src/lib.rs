//! Storefront Edge - an edge proxy in front of a storefront
//!
//! Page requests go to the rendering origin, with hot pages served from a
//! shared HTML cache. API requests go to the gateway. Every visitor gets an
//! identity token, minted as a guest token on the first visit.

pub mod application;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
