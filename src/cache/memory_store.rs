//! In-process cache store for single-instance runs and tests

use crate::cache::store::{CacheStore, LockToken};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// [`CacheStore`] over a mutex-guarded map with lazy TTL expiry
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    ready: AtomicBool,
    set_calls: AtomicUsize,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(true),
            set_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the store going away or coming back
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of successful `set` calls so far
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Raw value under `key`, ignoring readiness
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.value.clone())
    }

    /// Write directly, bypassing readiness and the write counter
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.lock().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(stored) if stored.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(stored) => Some(stored.value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Option<String> {
        if !self.is_ready() {
            return None;
        }
        self.live_value(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.entries.lock().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn del(&self, key: &str) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.entries.lock().remove(key);
        true
    }

    async fn ping(&self) -> bool {
        self.is_ready()
    }

    async fn acquire_lock(&self, lock_key: &str, token: &LockToken, ttl: Duration) -> bool {
        if !self.is_ready() {
            return false;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries
            .get(lock_key)
            .is_some_and(|stored| !stored.is_expired(now))
        {
            return false;
        }
        entries.insert(
            lock_key.to_string(),
            StoredValue {
                value: token.as_str().to_string(),
                expires_at: Some(now + ttl),
            },
        );
        true
    }

    async fn release_lock(&self, lock_key: &str, token: &LockToken) -> bool {
        if !self.is_ready() {
            return false;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let held_by_token = entries
            .get(lock_key)
            .is_some_and(|stored| !stored.is_expired(now) && stored.value == token.as_str());
        if held_by_token {
            entries.remove(lock_key);
        }
        held_by_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_set_del() {
        let store = InMemoryCacheStore::new();

        assert_eq!(store.get("k").await, None);
        assert!(store.set("k", "v", TTL).await);
        assert_eq!(store.get("k").await.as_deref(), Some("v"));
        assert!(store.del("k").await);
        assert_eq!(store.get("k").await, None);
        assert_eq!(store.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = InMemoryCacheStore::new();
        assert!(store.set("k", "v", Duration::from_millis(20)).await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn test_not_ready_store_degrades() {
        let store = InMemoryCacheStore::new();
        store.insert_raw("k", "v");
        store.set_ready(false);

        assert!(!store.is_ready());
        assert_eq!(store.get("k").await, None);
        assert!(!store.set("k", "w", TTL).await);
        assert!(!store.del("k").await);
        assert!(!store.ping().await);
        assert!(!store.acquire_lock("lock:k", &LockToken::generate(), TTL).await);
        assert_eq!(store.peek("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_lock_is_mutually_exclusive() {
        let store = InMemoryCacheStore::new();
        let first = LockToken::generate();
        let second = LockToken::generate();

        assert!(store.acquire_lock("lock:k", &first, TTL).await);
        assert!(!store.acquire_lock("lock:k", &second, TTL).await);

        // Releasing with the wrong token leaves the lock in place
        assert!(!store.release_lock("lock:k", &second).await);
        assert!(!store.acquire_lock("lock:k", &second, TTL).await);

        assert!(store.release_lock("lock:k", &first).await);
        assert!(store.acquire_lock("lock:k", &second, TTL).await);
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken() {
        let store = InMemoryCacheStore::new();
        let first = LockToken::generate();
        assert!(
            store
                .acquire_lock("lock:k", &first, Duration::from_millis(20))
                .await
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.acquire_lock("lock:k", &LockToken::generate(), TTL).await);
    }
}
