//! Owns the ring and the per-shard clients, routes operations with retry,
//! and runs the singleton health-probe loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::counter::ring::Ring;
use crate::counter::shard_client::{RedisShardClient, ShardClient};
use crate::error::AppError;

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Placeholder client for a shard whose initial connection failed.
/// Every call fails, so the shard stays marked unhealthy until the
/// process is restarted with a reachable URL.
struct UnavailableShardClient;

#[async_trait]
impl ShardClient for UnavailableShardClient {
    async fn incr(&self, _key: &str, _delta: i64) -> Result<i64, AppError> {
        Err(AppError::ShardUnavailable("shard was never reachable".to_string()))
    }
    async fn get(&self, _key: &str) -> Result<Option<i64>, AppError> {
        Err(AppError::ShardUnavailable("shard was never reachable".to_string()))
    }
    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<i64>>, AppError> {
        Err(AppError::ShardUnavailable("shard was never reachable".to_string()))
    }
    async fn del(&self, _key: &str) -> Result<bool, AppError> {
        Err(AppError::ShardUnavailable("shard was never reachable".to_string()))
    }
    async fn ping(&self) -> Result<(), AppError> {
        Err(AppError::ShardUnavailable("shard was never reachable".to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardManagerStatus {
    pub shards: usize,
    pub healthy_shards: usize,
    pub health: HashMap<String, bool>,
    pub distribution: HashMap<String, usize>,
}

pub struct ShardManager {
    ring: Arc<RwLock<Ring>>,
    clients: HashMap<String, Arc<dyn ShardClient>>,
    health: Arc<RwLock<HashMap<String, bool>>>,
    retry_attempts: u32,
    _shutdown_tx: watch::Sender<bool>,
}

impl ShardManager {
    /// Production constructor: establishes one Redis connection per shard
    /// URL. A shard whose connection attempt fails is still added to the
    /// ring (so distribution and status report it) but starts unhealthy.
    pub async fn connect(
        urls: &[String],
        virtual_nodes: u32,
        retry_attempts: u32,
        timeout_seconds: u64,
        max_in_flight: usize,
    ) -> Self {
        let mut ring = Ring::new(virtual_nodes);
        let mut clients: HashMap<String, Arc<dyn ShardClient>> = HashMap::new();
        let mut health = HashMap::new();

        for url in urls {
            ring.add(url.clone());
            match RedisShardClient::connect(url, timeout_seconds, max_in_flight).await {
                Ok(client) => {
                    info!("connected to shard {}", url);
                    clients.insert(url.clone(), Arc::new(client));
                    health.insert(url.clone(), true);
                }
                Err(e) => {
                    error!("failed to connect to shard {}: {}", url, e);
                    clients.insert(url.clone(), Arc::new(UnavailableShardClient));
                    health.insert(url.clone(), false);
                }
            }
        }

        Self::from_parts(ring, clients, health, retry_attempts)
    }

    /// Test/embedding constructor: caller supplies already-constructed
    /// clients (e.g. the in-memory fake), all assumed healthy.
    pub fn from_clients(
        clients: HashMap<String, Arc<dyn ShardClient>>,
        virtual_nodes: u32,
        retry_attempts: u32,
    ) -> Self {
        let ring = Ring::with_shards(virtual_nodes, clients.keys().cloned());
        let health = clients.keys().map(|id| (id.clone(), true)).collect();
        Self::from_parts(ring, clients, health, retry_attempts)
    }

    fn from_parts(
        ring: Ring,
        clients: HashMap<String, Arc<dyn ShardClient>>,
        health: HashMap<String, bool>,
        retry_attempts: u32,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ring: Arc::new(RwLock::new(ring)),
            clients,
            health: Arc::new(RwLock::new(health)),
            retry_attempts,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Spawn the singleton health-probe loop. One per process.
    pub fn spawn_health_probe(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut shutdown_rx = manager._shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(HEALTH_PROBE_INTERVAL) => {
                        manager.probe_once().await;
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

    async fn probe_once(&self) {
        for (shard_id, client) in &self.clients {
            let result = client.ping().await;
            let mut health = self.health.write().await;
            let was_healthy = *health.get(shard_id).unwrap_or(&false);
            let is_healthy = result.is_ok();
            if was_healthy != is_healthy {
                if is_healthy {
                    info!("shard {} is back online", shard_id);
                } else {
                    warn!("shard {} is now unhealthy", shard_id);
                }
            }
            health.insert(shard_id.clone(), is_healthy);
        }
    }

    /// Route a key, falling back to another shard if the primary route is
    /// unhealthy. Probe-only: does not mutate the ring.
    async fn route_healthy(&self, key: &str) -> Result<String, AppError> {
        let ring = self.ring.read().await;
        let primary = ring.route(key)?;
        let health = self.health.read().await;
        if *health.get(&primary).unwrap_or(&false) {
            return Ok(primary);
        }

        let total_shards = ring.shards().len();
        let mut candidate = primary;
        for _ in 0..total_shards {
            candidate = ring.route(&format!("fallback_{}", candidate))?;
            if *health.get(&candidate).unwrap_or(&false) {
                return Ok(candidate);
            }
        }
        Err(AppError::NoHealthyShards)
    }

    fn client_for(&self, shard: &str) -> Result<Arc<dyn ShardClient>, AppError> {
        self.clients
            .get(shard)
            .cloned()
            .ok_or_else(|| AppError::NoHealthyShards)
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, shard: &str, f: F) -> Result<T, AppError>
    where
        F: Fn(Arc<dyn ShardClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let client = self.client_for(shard)?;

        for attempt in 0..self.retry_attempts {
            match f(Arc::clone(&client)).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt + 1 == self.retry_attempts {
                        error!(
                            "{} on shard {} failed after {} attempts: {}",
                            op, shard, self.retry_attempts, e
                        );
                        return Err(AppError::ShardUnavailable(format!(
                            "{} failed after {} attempts: {}",
                            op, self.retry_attempts, e
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs_f64(0.1 * (attempt as f64 + 1.0))).await;
                }
            }
        }
        unreachable!("retry_attempts must be >= 1")
    }

    /// Route, increment, retry. Returns the new value and the shard id.
    pub async fn increment(&self, key: &str, delta: i64) -> Result<(i64, String), AppError> {
        let shard = self.route_healthy(key).await?;
        let value = self
            .with_retry("increment", &shard, |client| {
                let key = key.to_string();
                async move { client.incr(&key, delta).await }
            })
            .await?;
        Ok((value, shard))
    }

    /// Route, get. Missing key yields 0, not an error.
    pub async fn get(&self, key: &str) -> Result<(i64, String), AppError> {
        let shard = self.route_healthy(key).await?;
        let value = self
            .with_retry("get", &shard, |client| {
                let key = key.to_string();
                async move { Ok(client.get(&key).await?.unwrap_or(0)) }
            })
            .await?;
        Ok((value, shard))
    }

    /// Group keys by routed shard and issue one mget per shard in
    /// parallel. A shard-level failure yields 0 for each of its keys;
    /// this path never retries across shards.
    pub async fn mget(&self, keys: &[String]) -> Result<HashMap<String, (i64, String)>, AppError> {
        let mut by_shard: HashMap<String, Vec<String>> = HashMap::new();
        for key in keys {
            let shard = self.route_healthy(key).await?;
            by_shard.entry(shard).or_default().push(key.clone());
        }

        let futures = by_shard.into_iter().map(|(shard, shard_keys)| async move {
            let client = self.client_for(&shard);
            let values = match client {
                Ok(client) => client.mget(&shard_keys).await,
                Err(_) => Err(AppError::NoHealthyShards),
            };
            match values {
                Ok(values) => shard_keys
                    .into_iter()
                    .zip(values)
                    .map(|(k, v)| (k, (v.unwrap_or(0), shard.clone())))
                    .collect::<Vec<_>>(),
                Err(e) => {
                    error!("mget on shard {} failed: {}", shard, e);
                    shard_keys
                        .into_iter()
                        .map(|k| (k, (0, shard.clone())))
                        .collect::<Vec<_>>()
                }
            }
        });

        let results = join_all(futures).await;
        Ok(results.into_iter().flatten().collect())
    }

    /// Route, delete. Returns whether a prior value existed.
    pub async fn reset(&self, key: &str) -> Result<bool, AppError> {
        let shard = self.route_healthy(key).await?;
        self.with_retry("reset", &shard, |client| {
            let key = key.to_string();
            async move { client.del(&key).await }
        })
        .await
    }

    #[cfg(test)]
    pub async fn force_all_unhealthy_for_test(&self) {
        let mut health = self.health.write().await;
        for v in health.values_mut() {
            *v = false;
        }
    }

    pub async fn status(&self) -> ShardManagerStatus {
        let ring = self.ring.read().await;
        let health = self.health.read().await;
        ShardManagerStatus {
            shards: ring.shards().len(),
            healthy_shards: health.values().filter(|h| **h).count(),
            health: health.clone(),
            distribution: ring.distribution(),
        }
    }
}

impl Drop for ShardManager {
    fn drop(&mut self) {
        let _ = self._shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::shard_client::fake::FakeShardClient;

    fn manager_with(shards: &[&str]) -> ShardManager {
        let clients: HashMap<String, Arc<dyn ShardClient>> = shards
            .iter()
            .map(|s| (s.to_string(), Arc::new(FakeShardClient::new()) as Arc<dyn ShardClient>))
            .collect();
        ShardManager::from_clients(clients, 100, 3)
    }

    #[tokio::test]
    async fn increment_then_get_round_trips() {
        let manager = manager_with(&["s1", "s2", "s3"]);
        let (v, _) = manager.increment("visits:page-A", 3).await.unwrap();
        assert_eq!(v, 3);
        let (v, _) = manager.get("visits:page-A").await.unwrap();
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn missing_key_reads_as_zero() {
        let manager = manager_with(&["s1"]);
        let (v, _) = manager.get("visits:missing").await.unwrap();
        assert_eq!(v, 0);
    }

    #[tokio::test]
    async fn single_unhealthy_shard_is_transparent() {
        let manager = manager_with(&["s1", "s2", "s3"]);
        {
            let mut health = manager.health.write().await;
            let target = health.keys().next().unwrap().clone();
            health.insert(target, false);
        }
        // Every key should still route somewhere healthy.
        for i in 0..20 {
            let key = format!("visits:page-{}", i);
            assert!(manager.increment(&key, 1).await.is_ok());
        }
    }

    #[tokio::test]
    async fn all_shards_unhealthy_fails_with_no_healthy_shards() {
        let manager = manager_with(&["s1", "s2"]);
        {
            let mut health = manager.health.write().await;
            for v in health.values_mut() {
                *v = false;
            }
        }
        let err = manager.increment("visits:page-A", 1).await.unwrap_err();
        assert!(matches!(err, AppError::NoHealthyShards));
    }

    #[tokio::test]
    async fn reset_reports_whether_prior_value_existed() {
        let manager = manager_with(&["s1"]);
        assert_eq!(manager.reset("visits:page-A").await.unwrap(), false);
        manager.increment("visits:page-A", 1).await.unwrap();
        assert_eq!(manager.reset("visits:page-A").await.unwrap(), true);
    }

    #[tokio::test]
    async fn mget_batches_by_shard_and_tolerates_a_missing_key() {
        let manager = manager_with(&["s1", "s2", "s3"]);
        manager.increment("visits:page-A", 2).await.unwrap();
        manager.increment("visits:page-B", 5).await.unwrap();

        let keys = vec![
            "visits:page-A".to_string(),
            "visits:page-B".to_string(),
            "visits:page-Z".to_string(),
        ];
        let results = manager.mget(&keys).await.unwrap();
        assert_eq!(results["visits:page-A"].0, 2);
        assert_eq!(results["visits:page-B"].0, 5);
        assert_eq!(results["visits:page-Z"].0, 0);
    }
}
