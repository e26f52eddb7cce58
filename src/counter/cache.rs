//! Bounded TTL read cache. A plain `(value, timestamp)` entry, never a
//! heterogeneous map, evicted lazily by the sweep loop and eagerly
//! capacity-bounded on insert.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: i64,
    inserted_at: Instant,
}

pub enum Lookup {
    Fresh(i64),
    Stale(i64),
    Miss,
}

pub struct ReadCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
    _shutdown_tx: watch::Sender<bool>,
}

impl ReadCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub async fn lookup(&self, storage_key: &str) -> Lookup {
        let entries = self.entries.read().await;
        match entries.get(storage_key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Lookup::Fresh(entry.value),
            Some(entry) => Lookup::Stale(entry.value),
            None => Lookup::Miss,
        }
    }

    /// Place or replace the entry. If at or over capacity, evict the
    /// oldest entry by timestamp first. Capacity is a soft ceiling:
    /// transient overshoot during concurrent inserts is acceptable.
    pub async fn insert(&self, storage_key: String, value: i64) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity && !entries.contains_key(&storage_key) {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }
        entries.insert(
            storage_key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, storage_key: &str) {
        self.entries.write().await.remove(storage_key);
    }

    pub async fn sweep(&self) {
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Background cleanup loop: every `ttl`, drop every entry whose age
    /// is at or beyond the TTL.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) {
        let cache = std::sync::Arc::clone(self);
        let mut shutdown_rx = cache._shutdown_tx.subscribe();
        let ttl = cache.ttl;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(ttl) => {
                        cache.sweep().await;
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

impl Drop for ReadCache {
    fn drop(&mut self) {
        let _ = self._shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_hit_then_invalidate() {
        let cache = ReadCache::new(Duration::from_secs(5), 1000);
        cache.insert("visits:page-A".to_string(), 3).await;
        assert!(matches!(cache.lookup("visits:page-A").await, Lookup::Fresh(3)));

        cache.invalidate("visits:page-A").await;
        assert!(matches!(cache.lookup("visits:page-A").await, Lookup::Miss));
    }

    #[tokio::test]
    async fn stale_entries_are_reported_not_evicted_by_lookup() {
        let cache = ReadCache::new(Duration::from_millis(10), 1000);
        cache.insert("k".to_string(), 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(cache.lookup("k").await, Lookup::Stale(1)));
        // size() still reflects the entry until the sweep runs.
        assert_eq!(cache.size().await, 1);
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let cache = ReadCache::new(Duration::from_millis(10), 1000);
        cache.insert("k".to_string(), 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.sweep().await;
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn insert_over_capacity_evicts_oldest() {
        let cache = ReadCache::new(Duration::from_secs(5), 2);
        cache.insert("a".to_string(), 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert("b".to_string(), 2).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert("c".to_string(), 3).await;

        assert!(cache.size().await <= 2);
        assert!(matches!(cache.lookup("a").await, Lookup::Miss));
    }
}
