//! The abstract KV shard client capability consumed by the shard manager,
//! plus the concrete Redis-backed implementation used in production.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Semaphore;

use crate::error::AppError;

/// One backing key-value node. Key space is flat strings; value space is
/// non-negative 64-bit integers.
#[async_trait]
pub trait ShardClient: Send + Sync {
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, AppError>;
    async fn get(&self, key: &str) -> Result<Option<i64>, AppError>;
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<i64>>, AppError>;
    async fn del(&self, key: &str) -> Result<bool, AppError>;
    async fn ping(&self) -> Result<(), AppError>;
}

/// Redis-backed shard client. Reuses a single multiplexed connection
/// (`ConnectionManager` reconnects transparently) and bounds in-flight
/// operations with a semaphore rather than opening a pool per call.
pub struct RedisShardClient {
    manager: ConnectionManager,
    concurrency: Arc<Semaphore>,
    timeout: Duration,
}

impl RedisShardClient {
    pub async fn connect(url: &str, timeout_seconds: u64, max_in_flight: usize) -> Result<Self, AppError> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::ShardUnavailable(format!("invalid shard url {}: {}", url, e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::ShardUnavailable(format!("connect {} failed: {}", url, e)))?;
        Ok(Self {
            manager,
            concurrency: Arc::new(Semaphore::new(max_in_flight)),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T, AppError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::ShardUnavailable("shard call timed out".to_string())),
        }
    }
}

#[async_trait]
impl ShardClient for RedisShardClient {
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, AppError> {
        let _permit = self.concurrency.acquire().await;
        let mut conn = self.manager.clone();
        self.with_timeout(conn.incr(key, delta)).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, AppError> {
        let _permit = self.concurrency.acquire().await;
        let mut conn = self.manager.clone();
        self.with_timeout(conn.get(key)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<i64>>, AppError> {
        let _permit = self.concurrency.acquire().await;
        let mut conn = self.manager.clone();
        self.with_timeout(conn.mget(keys)).await
    }

    async fn del(&self, key: &str) -> Result<bool, AppError> {
        let _permit = self.concurrency.acquire().await;
        let mut conn = self.manager.clone();
        let deleted: i64 = self.with_timeout(conn.del(key)).await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<(), AppError> {
        let _permit = self.concurrency.acquire().await;
        let mut conn = self.manager.clone();
        let _: String = self
            .with_timeout(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}

/// Test-only in-memory shard client, used so the ring/manager/buffer/cache
/// logic can be exercised without a live Redis. Supports toggling a
/// failure mode to exercise retry and degraded-read paths.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    pub struct FakeShardClient {
        pub store: Mutex<HashMap<String, i64>>,
        pub failing: AtomicBool,
    }

    impl FakeShardClient {
        pub fn new() -> Self {
            Self {
                store: Mutex::new(HashMap::new()),
                failing: AtomicBool::new(false),
            }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ShardClient for FakeShardClient {
        async fn incr(&self, key: &str, delta: i64) -> Result<i64, AppError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::ShardUnavailable("fake failure".to_string()));
            }
            let mut store = self.store.lock().await;
            let entry = store.entry(key.to_string()).or_insert(0);
            *entry += delta;
            Ok(*entry)
        }

        async fn get(&self, key: &str) -> Result<Option<i64>, AppError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::ShardUnavailable("fake failure".to_string()));
            }
            let store = self.store.lock().await;
            Ok(store.get(key).copied())
        }

        async fn mget(&self, keys: &[String]) -> Result<Vec<Option<i64>>, AppError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::ShardUnavailable("fake failure".to_string()));
            }
            let store = self.store.lock().await;
            Ok(keys.iter().map(|k| store.get(k).copied()).collect())
        }

        async fn del(&self, key: &str) -> Result<bool, AppError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::ShardUnavailable("fake failure".to_string()));
            }
            let mut store = self.store.lock().await;
            Ok(store.remove(key).is_some())
        }

        async fn ping(&self) -> Result<(), AppError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(AppError::ShardUnavailable("fake failure".to_string()))
            } else {
                Ok(())
            }
        }
    }
}
