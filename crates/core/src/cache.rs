//! Time-bounded memo of fetch batches.

use crate::domain::analysis::FetchBatch;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub limit: usize,
    pub catalog_version: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    batch: Arc<FetchBatch>,
    expires_at: Instant,
}

/// Entries are immutable snapshots, replaced wholesale on `put`.
#[derive(Debug, Clone)]
pub struct BatchCache {
    inner: Arc<tokio::sync::RwLock<HashMap<BatchKey, CacheEntry>>>,
    default_ttl: Duration,
}

impl BatchCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn get(&self, key: &BatchKey) -> Option<Arc<FetchBatch>> {
        let map = self.inner.read().await;
        map.get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| Arc::clone(&entry.batch))
    }

    /// Store `batch` under `key` for `ttl` (or the default). A zero TTL stores nothing.
    /// Expired entries are dropped on every insert, so the map is bounded by the live keys.
    pub async fn put(&self, key: BatchKey, batch: Arc<FetchBatch>, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let mut map = self.inner.write().await;
        map.retain(|_, entry| entry.expires_at > now);
        map.insert(
            key,
            CacheEntry {
                batch,
                expires_at: now + ttl,
            },
        );
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Entry count, expired entries included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
