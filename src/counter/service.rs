//! Orchestrates the ring, shard manager, write buffer, and read cache
//! behind the four public counter operations.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::Config;
use crate::counter::buffer::WriteBuffer;
use crate::counter::cache::{Lookup, ReadCache};
use crate::counter::shard_client::ShardClient;
use crate::counter::shard_manager::ShardManager;
use crate::error::AppError;

fn storage_key(page_id: &str) -> String {
    format!("visits:{}", page_id)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CounterMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusDocument {
    pub status: &'static str,
    pub shards: usize,
    pub healthy_shards: usize,
    pub shard_health: std::collections::HashMap<String, bool>,
    pub distribution: std::collections::HashMap<String, usize>,
    pub cache_size: usize,
    pub buffer_size: usize,
    pub metrics: CounterMetrics,
    pub last_flush_seconds_ago: f64,
}

pub struct CounterService {
    shards: Arc<ShardManager>,
    buffer: Arc<WriteBuffer>,
    cache: Arc<ReadCache>,
    metrics: RwLock<CounterMetrics>,
}

impl CounterService {
    /// Production constructor: connects to every configured shard,
    /// starts the health-probe loop, the flusher, and the cache sweeper.
    pub async fn new(config: &Config) -> Self {
        let shards = Arc::new(
            ShardManager::connect(
                &config.shards.urls,
                config.shards.virtual_nodes,
                config.shards.retry_attempts,
                config.shards.timeout_seconds,
                10,
            )
            .await,
        );
        shards.spawn_health_probe();

        let buffer = Arc::new(WriteBuffer::new(Arc::clone(&shards)));
        buffer.spawn_flusher(Duration::from_secs_f64(config.buffer.batch_interval_seconds));

        let cache = Arc::new(ReadCache::new(
            Duration::from_secs(config.cache.ttl_seconds),
            config.cache.capacity,
        ));
        cache.spawn_sweeper();

        Self {
            shards,
            buffer,
            cache,
            metrics: RwLock::new(CounterMetrics::default()),
        }
    }

    /// Test-oriented constructor: no background tasks, caller drives
    /// `flush`/`sweep` explicitly for deterministic timing.
    pub fn with_components(shards: Arc<ShardManager>, ttl: Duration, capacity: usize) -> Self {
        Self {
            buffer: Arc::new(WriteBuffer::new(Arc::clone(&shards))),
            shards,
            cache: Arc::new(ReadCache::new(ttl, capacity)),
            metrics: RwLock::new(CounterMetrics::default()),
        }
    }

    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Enqueue the increment and invalidate the cache entry. No shard
    /// round-trip; the only failure mode is local memory exhaustion,
    /// which a bounded in-memory map does not raise.
    pub async fn increment(&self, page_id: &str) {
        self.buffer.enqueue(page_id).await;
        self.cache.invalidate(&storage_key(page_id)).await;
    }

    /// Fresh cache hit -> `in_memory`. Otherwise synchronously flush the
    /// buffer so the shard read reflects everything already accepted,
    /// then re-check the buffer for anything that arrived during the
    /// flush/shard round-trip. A shard failure degrades to the
    /// best-known in-memory value, tagged `write_buffer`; this is not an
    /// error to the caller.
    pub async fn get(&self, page_id: &str) -> (i64, String) {
        let key = storage_key(page_id);

        if let Lookup::Fresh(value) = self.cache.lookup(&key).await {
            self.metrics.write().await.cache_hits += 1;
            return (value, "in_memory".to_string());
        }
        self.metrics.write().await.cache_misses += 1;

        self.buffer.flush().await;

        match self.shards.get(&key).await {
            Ok((shard_value, shard_id)) => {
                let pending = self.buffer.pending_delta(page_id).await;
                let total = shard_value + pending;
                self.cache.insert(key, total).await;
                (total, format!("redis_{}", shard_id))
            }
            Err(e) => {
                warn!("degraded read for {}: {}", page_id, e);
                let pending = self.buffer.pending_delta(page_id).await;
                (pending, "write_buffer".to_string())
            }
        }
    }

    /// Invalidate cache and buffer locally, then delete at the shard.
    /// Errors propagate.
    pub async fn reset(&self, page_id: &str) -> Result<bool, AppError> {
        let key = storage_key(page_id);
        self.cache.invalidate(&key).await;
        self.buffer.remove(page_id).await;
        self.shards.reset(&key).await
    }

    pub async fn status(&self) -> StatusDocument {
        let shard_status = self.shards.status().await;
        let metrics = self.metrics.read().await.clone();
        let last_flush_seconds_ago = self.buffer.last_flush_time().await.elapsed().as_secs_f64();

        StatusDocument {
            status: if shard_status.healthy_shards > 0 { "healthy" } else { "degraded" },
            shards: shard_status.shards,
            healthy_shards: shard_status.healthy_shards,
            shard_health: shard_status.health,
            distribution: shard_status.distribution,
            cache_size: self.cache.size().await,
            buffer_size: self.buffer.len().await,
            metrics,
            last_flush_seconds_ago,
        }
    }
}

/// Helper used only by tests to build a `ShardManager` directly from a
/// map of fake clients, matching the signature `ShardManager::from_clients`
/// already exposes.
#[cfg(test)]
fn test_shard_manager(
    clients: std::collections::HashMap<String, Arc<dyn ShardClient>>,
) -> Arc<ShardManager> {
    Arc::new(ShardManager::from_clients(clients, 100, 3))
}
