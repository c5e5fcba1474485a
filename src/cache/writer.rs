//! Background cache writer
//!
//! Writes are queued on a bounded channel and applied one at a time by a
//! single worker task, so a slow store never holds up a response and no write
//! future is left dangling.

use crate::cache::store::CacheStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug)]
enum WriteJob {
    Store {
        key: String,
        payload: String,
        ttl: Duration,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct CacheWriter {
    tx: mpsc::Sender<WriteJob>,
}

impl CacheWriter {
    /// Spawn the worker; `write_timeout` bounds each store write
    pub fn spawn(store: Arc<dyn CacheStore>, capacity: usize, write_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(store, rx, write_timeout));
        Self { tx }
    }

    /// Queue a write without waiting. `false` when the queue is full or closed.
    pub fn dispatch(&self, key: String, payload: String, ttl: Duration) -> bool {
        match self.tx.try_send(WriteJob::Store { key, payload, ttl }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(WriteJob::Store { key, .. })) => {
                warn!(cache_key = %key, "Cache write queue full; dropping write");
                false
            }
            Err(_) => {
                warn!("Cache writer has stopped; dropping write");
                false
            }
        }
    }

    /// Wait until every write dispatched before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker(
    store: Arc<dyn CacheStore>,
    mut rx: mpsc::Receiver<WriteJob>,
    write_timeout: Duration,
) {
    while let Some(job) = rx.recv().await {
        match job {
            WriteJob::Store { key, payload, ttl } => {
                let started = Instant::now();
                match tokio::time::timeout(write_timeout, store.set(&key, &payload, ttl)).await {
                    Ok(true) => debug!(
                        cache_key = %key,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Cache write applied"
                    ),
                    Ok(false) => warn!(cache_key = %key, "Cache write rejected by store"),
                    Err(_) => warn!(
                        cache_key = %key,
                        timeout_ms = write_timeout.as_millis() as u64,
                        "Cache write timed out"
                    ),
                }
            }
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_store::InMemoryCacheStore;

    #[tokio::test]
    async fn test_flush_waits_for_dispatched_writes() {
        let store = Arc::new(InMemoryCacheStore::new());
        let writer = CacheWriter::spawn(store.clone(), 16, Duration::from_secs(3));

        for i in 0..5 {
            assert!(writer.dispatch(format!("k{i}"), "v".to_string(), Duration::from_secs(60)));
        }
        writer.flush().await;

        assert_eq!(store.set_calls(), 5);
        assert_eq!(store.peek("k4").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_writes_to_unready_store_are_dropped() {
        let store = Arc::new(InMemoryCacheStore::new());
        store.set_ready(false);
        let writer = CacheWriter::spawn(store.clone(), 4, Duration::from_secs(3));

        assert!(writer.dispatch("k".to_string(), "v".to_string(), Duration::from_secs(60)));
        writer.flush().await;

        assert_eq!(store.set_calls(), 0);
        assert_eq!(store.peek("k"), None);
    }
}
