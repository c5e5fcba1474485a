//! Key/value store contract shared by the Redis and in-process backends

use async_trait::async_trait;
use derive_more::Display;
use std::time::Duration;
use uuid::Uuid;

/// Value proving ownership of a held lock.
///
/// A fresh token is generated for every acquisition attempt so that a
/// release can never free a lock taken by someone else.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Async cache store.
///
/// Failures never surface as errors: an unavailable store reads as a miss
/// (`None`) and rejects writes (`false`). Implementations log what went
/// wrong.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether the store currently holds a usable connection
    fn is_ready(&self) -> bool;

    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;

    /// Remove `key`; `true` when the command succeeded
    async fn del(&self, key: &str) -> bool;

    async fn ping(&self) -> bool;

    /// Take `lock_key` for `ttl` unless somebody else holds it
    async fn acquire_lock(&self, lock_key: &str, token: &LockToken, ttl: Duration) -> bool;

    /// Free `lock_key` only if it is still held with `token`
    async fn release_lock(&self, lock_key: &str, token: &LockToken) -> bool;
}

/// Expiry in whole seconds, never zero
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
