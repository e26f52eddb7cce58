//! Coalescing write buffer: accumulates per-key increments in memory and
//! flushes them to the shard manager as a single `+delta` per key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tracing::warn;

use crate::counter::shard_manager::ShardManager;

pub struct WriteBuffer {
    pending: Mutex<HashMap<String, i64>>,
    last_flush: Mutex<Instant>,
    shards: Arc<ShardManager>,
    _shutdown_tx: watch::Sender<bool>,
}

impl WriteBuffer {
    pub fn new(shards: Arc<ShardManager>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pending: Mutex::new(HashMap::new()),
            last_flush: Mutex::new(Instant::now()),
            shards,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Add 1 to `buffer[page_id]`, creating the entry if absent. Safe
    /// against concurrent enqueues and a concurrent flush.
    pub async fn enqueue(&self, page_id: &str) {
        let mut pending = self.pending.lock().await;
        *pending.entry(page_id.to_string()).or_insert(0) += 1;
    }

    /// Current unflushed delta for a key, or 0 if none is pending. Used
    /// for the read-path merge and the degraded-read fallback.
    pub async fn pending_delta(&self, page_id: &str) -> i64 {
        let pending = self.pending.lock().await;
        pending.get(page_id).copied().unwrap_or(0)
    }

    pub async fn remove(&self, page_id: &str) {
        let mut pending = self.pending.lock().await;
        pending.remove(page_id);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drain the buffer, apply every pending increment to the shard
    /// manager, and merge any delta that failed to flush back into the
    /// live buffer. Increments are never dropped by a flush, only
    /// deferred.
    pub async fn flush(&self) {
        let snapshot = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };

        for (page_id, delta) in snapshot {
            if delta <= 0 {
                continue;
            }
            let storage_key = format!("visits:{}", page_id);
            match self.shards.increment(&storage_key, delta).await {
                Ok(_) => {}
                Err(e) => {
                    warn!("flush failed for {}, restoring delta {}: {}", page_id, delta, e);
                    self.restore(&page_id, delta).await;
                }
            }
        }

        *self.last_flush.lock().await = Instant::now();
    }

    async fn restore(&self, page_id: &str, delta: i64) {
        let mut pending = self.pending.lock().await;
        *pending.entry(page_id.to_string()).or_insert(0) += delta;
    }

    pub async fn last_flush_time(&self) -> Instant {
        *self.last_flush.lock().await
    }

    /// Background flusher: sleeps `interval`, flushes, logs and continues
    /// on error. Never exits except at shutdown.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) {
        let buffer = Arc::clone(self);
        let mut shutdown_rx = buffer._shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        buffer.flush().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        let _ = self._shutdown_tx.send(true);
    }
}
