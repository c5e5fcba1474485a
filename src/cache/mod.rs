//! HTML page cache
//!
//! - [`key_policy`]: which requests are cacheable and under which key
//! - [`validator`]: which rendered bodies are safe to store
//! - [`store`]: the key/value contract, with Redis and in-process backends
//! - [`html_cache`]: the service the origin dispatcher talks to

pub mod backoff;
pub mod html_cache;
pub mod key_policy;
pub mod memory_store;
pub mod redis_store;
pub mod store;
pub mod validator;
pub mod writer;

pub use backoff::BackoffPolicy;
pub use html_cache::{
    CacheEntry, CacheRefresh, CacheWriteOptions, HtmlCacheConfig, HtmlCacheService,
};
pub use key_policy::{CacheKey, CacheKeyPolicy};
pub use memory_store::InMemoryCacheStore;
pub use redis_store::RedisCacheStore;
pub use store::{CacheStore, LockToken};
