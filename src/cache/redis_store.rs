//! Redis-backed cache store
//!
//! The initial connection is established in the background so startup never
//! blocks on Redis. Until it succeeds (or after it gives up) the store reports
//! not-ready and every operation degrades to a miss. Once connected, the
//! `ConnectionManager` reconnects on its own.

use crate::cache::backoff::BackoffPolicy;
use crate::cache::store::{ttl_seconds, CacheStore, LockToken};
use crate::proxy::types::ProxyError;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, ConnectionInfo, RedisError, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Deletes the lock only while it still holds the caller's token
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisCacheStore {
    connection: Arc<OnceCell<ConnectionManager>>,
}

impl RedisCacheStore {
    /// Start connecting to Redis in the background.
    ///
    /// Fails only if `info` cannot describe a Redis client at all.
    pub fn connect(info: ConnectionInfo, backoff: BackoffPolicy) -> Result<Self, RedisError> {
        let client = Client::open(info)?;
        let connection = Arc::new(OnceCell::new());

        let cell = Arc::clone(&connection);
        tokio::spawn(async move {
            establish(client, backoff, cell).await;
        });

        Ok(Self { connection })
    }

    fn connection(&self) -> Option<ConnectionManager> {
        self.connection.get().cloned()
    }

    fn log_failure(operation: &str, key: &str, err: RedisError) {
        let err = ProxyError::cache(operation, err);
        warn!(cache_key = %key, error = %err, "Cache store command failed");
    }
}

async fn establish(
    client: Client,
    backoff: BackoffPolicy,
    cell: Arc<OnceCell<ConnectionManager>>,
) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        // Retries of the initial connect are driven by `backoff`
        let config = ConnectionManagerConfig::new().set_number_of_retries(0);
        match ConnectionManager::new_with_config(client.clone(), config).await {
            Ok(manager) => {
                if cell.set(manager).is_ok() {
                    info!(attempt, "Connected to Redis cache store");
                }
                return;
            }
            Err(err) => match backoff.delay(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Redis connection attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        attempts = attempt,
                        error = %err,
                        "Giving up on Redis; HTML caching is disabled"
                    );
                    return;
                }
            },
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn is_ready(&self) -> bool {
        self.connection.initialized()
    }

    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                Self::log_failure("get", key, err);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let result = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<()>(&mut conn)
            .await;
        match result {
            Ok(()) => {
                debug!(cache_key = %key, ttl_secs = ttl_seconds(ttl), "Cache entry stored");
                true
            }
            Err(err) => {
                Self::log_failure("set", key, err);
                false
            }
        }
    }

    async fn del(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        match conn.del::<_, i64>(key).await {
            Ok(_) => true,
            Err(err) => {
                Self::log_failure("del", key, err);
                false
            }
        }
    }

    async fn ping(&self) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(reply) => reply == "PONG",
            Err(err) => {
                Self::log_failure("ping", "", err);
                false
            }
        }
    }

    async fn acquire_lock(&self, lock_key: &str, token: &LockToken, ttl: Duration) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let result = redis::cmd("SET")
            .arg(lock_key)
            .arg(token.as_str())
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<Option<String>>(&mut conn)
            .await;
        match result {
            Ok(reply) => reply.is_some(),
            Err(err) => {
                Self::log_failure("lock", lock_key, err);
                false
            }
        }
    }

    async fn release_lock(&self, lock_key: &str, token: &LockToken) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let result = Script::new(RELEASE_LOCK_SCRIPT)
            .key(lock_key)
            .arg(token.as_str())
            .invoke_async::<i64>(&mut conn)
            .await;
        match result {
            Ok(deleted) => deleted == 1,
            Err(err) => {
                Self::log_failure("unlock", lock_key, err);
                false
            }
        }
    }
}
