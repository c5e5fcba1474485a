//! HTML cache service
//!
//! Sits between the origin dispatcher and the cache store. Every failure on
//! this path degrades to a miss: a slow, unavailable or corrupted cache must
//! never break a live request.

use crate::cache::key_policy::{CacheKey, CacheKeyPolicy};
use crate::cache::store::{CacheStore, LockToken};
use crate::cache::validator::is_valid_html;
use crate::cache::writer::CacheWriter;
use crate::config::CacheSettings;
use crate::proxy::headers::content_types::TEXT_HTML;
use crate::proxy::types::ProxyError;
use chrono::Utc;
use http::{StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cached rendering of a page, stored as camelCase JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub content: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    pub stored_at_epoch_ms: i64,
}

impl CacheEntry {
    /// Wrap a value written as bare HTML by an older deployment
    pub fn legacy(content: String) -> Self {
        Self {
            content,
            content_type: TEXT_HTML.to_string(),
            etag: None,
            content_language: None,
            stored_at_epoch_ms: 0,
        }
    }
}

/// Response metadata that travels with a cache write
#[derive(Debug, Clone)]
pub struct CacheWriteOptions {
    pub status: StatusCode,
    pub etag: Option<String>,
    pub content_language: Option<String>,
}

impl Default for CacheWriteOptions {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            etag: None,
            content_language: None,
        }
    }
}

/// Outcome of a locked warmup write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRefresh {
    Stored,
    /// Another writer holds the lock for this key
    Contended,
    /// Path not cacheable or content failed validation
    Rejected,
    Failed,
}

#[derive(Debug, Clone)]
pub struct HtmlCacheConfig {
    pub ttl: Duration,
    pub lookup_timeout: Duration,
    pub write_timeout: Duration,
    pub lock_ttl: Duration,
    pub write_queue_capacity: usize,
}

impl Default for HtmlCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            lookup_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(3),
            lock_ttl: Duration::from_secs(10),
            write_queue_capacity: 256,
        }
    }
}

impl From<&CacheSettings> for HtmlCacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl(),
            lookup_timeout: settings.lookup_timeout(),
            write_timeout: settings.write_timeout(),
            lock_ttl: settings.lock_ttl(),
            write_queue_capacity: settings.write_queue_capacity,
        }
    }
}

pub struct HtmlCacheService {
    store: Arc<dyn CacheStore>,
    policy: CacheKeyPolicy,
    writer: CacheWriter,
    config: HtmlCacheConfig,
}

impl HtmlCacheService {
    /// Build the service and spawn its background writer
    pub fn new(
        store: Arc<dyn CacheStore>,
        policy: CacheKeyPolicy,
        config: HtmlCacheConfig,
    ) -> Self {
        let writer = CacheWriter::spawn(
            Arc::clone(&store),
            config.write_queue_capacity,
            config.write_timeout,
        );
        Self {
            store,
            policy,
            writer,
            config,
        }
    }

    pub fn policy(&self) -> &CacheKeyPolicy {
        &self.policy
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    pub async fn ping(&self) -> bool {
        self.store.ping().await
    }

    /// Look up the cached page for `host` + `uri`
    pub async fn get(&self, host: &str, uri: &Uri) -> Option<CacheEntry> {
        if !self.policy.is_cacheable(uri) || !self.store.is_ready() {
            return None;
        }

        let key = self.policy.derive_key(host, uri);
        let started = Instant::now();
        let lookup = self.store.get(key.as_str());
        let raw = match tokio::time::timeout(self.config.lookup_timeout, lookup).await {
            Ok(value) => value?,
            Err(_) => {
                let err = ProxyError::cache(
                    "get",
                    format!("no reply within {:?}", self.config.lookup_timeout),
                );
                warn!(cache_key = %key, error = %err, "Cache lookup timed out; treating as miss");
                return None;
            }
        };

        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(_) => CacheEntry::legacy(raw),
        };

        if !is_valid_html(&entry.content, StatusCode::OK) {
            warn!(cache_key = %key, "Cached entry failed validation; deleting");
            self.store.del(key.as_str()).await;
            return None;
        }

        debug!(
            cache_key = %key,
            duration_ms = started.elapsed().as_millis() as u64,
            "Cache hit"
        );
        Some(entry)
    }

    /// Queue `content` for storage.
    ///
    /// Returns `true` once the write has been handed to the background writer;
    /// the write itself may still fail, which is only logged. Nothing is queued
    /// while the store is not ready.
    pub async fn set(
        &self,
        host: &str,
        uri: &Uri,
        content: &str,
        content_type: &str,
        options: CacheWriteOptions,
    ) -> bool {
        if !self.store.is_ready() {
            return false;
        }
        let Some((key, payload)) = self.prepare(host, uri, content, content_type, options) else {
            return false;
        };
        self.writer
            .dispatch(key.to_string(), payload, self.config.ttl)
    }

    pub async fn delete(&self, host: &str, uri: &Uri) -> bool {
        self.delete_path(host, uri.path()).await
    }

    /// Remove the entry for `path` on `host`, cacheable or not
    pub async fn delete_path(&self, host: &str, path: &str) -> bool {
        let key = self.policy.derive_key_for_path(host, path);
        let deleted = self.store.del(key.as_str()).await;
        if deleted {
            info!(cache_key = %key, "Cache entry purged");
        }
        deleted
    }

    /// Replace the entry while holding its lock, writing synchronously
    pub async fn refresh(
        &self,
        host: &str,
        uri: &Uri,
        content: &str,
        content_type: &str,
        options: CacheWriteOptions,
    ) -> CacheRefresh {
        let Some((key, payload)) = self.prepare(host, uri, content, content_type, options) else {
            return CacheRefresh::Rejected;
        };
        if !self.store.is_ready() {
            return CacheRefresh::Failed;
        }

        let lock_key = key.lock_key();
        let token = LockToken::generate();
        if !self
            .store
            .acquire_lock(&lock_key, &token, self.config.lock_ttl)
            .await
        {
            debug!(cache_key = %key, "Cache refresh already in progress elsewhere");
            return CacheRefresh::Contended;
        }

        let stored = matches!(
            tokio::time::timeout(
                self.config.write_timeout,
                self.store.set(key.as_str(), &payload, self.config.ttl),
            )
            .await,
            Ok(true)
        );

        if !self.store.release_lock(&lock_key, &token).await {
            warn!(cache_key = %key, "Cache lock expired before release");
        }

        if stored {
            info!(cache_key = %key, "Cache entry refreshed");
            CacheRefresh::Stored
        } else {
            warn!(cache_key = %key, "Cache refresh write failed");
            CacheRefresh::Failed
        }
    }

    /// Wait for every queued write to be applied
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    fn prepare(
        &self,
        host: &str,
        uri: &Uri,
        content: &str,
        content_type: &str,
        options: CacheWriteOptions,
    ) -> Option<(CacheKey, String)> {
        if !self.policy.is_cacheable(uri) {
            return None;
        }
        if !is_valid_html(content, options.status) {
            debug!(path = uri.path(), status = options.status.as_u16(), "Content not cacheable");
            return None;
        }

        let key = self.policy.derive_key(host, uri);
        let entry = CacheEntry {
            content: content.to_string(),
            content_type: content_type.to_string(),
            etag: options.etag,
            content_language: options.content_language,
            stored_at_epoch_ms: Utc::now().timestamp_millis(),
        };
        match serde_json::to_string(&entry) {
            Ok(payload) => Some((key, payload)),
            Err(err) => {
                warn!(cache_key = %key, error = %err, "Could not serialize cache entry");
                None
            }
        }
    }
}
