use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex as TokioMutex;

use super::{CacheEntry, CacheHandler};
use crate::error::RequestError;
use crate::response::Response;

/// In-process LRU response cache with an optional TTL.
///
/// Cloning shares the underlying storage.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<TokioMutex<LruCache<String, CacheEntry>>>,
    ttl: Option<Duration>,
}

impl MemoryCache {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::new(Self::DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN));
        Self {
            entries: Arc::new(TokioMutex::new(LruCache::new(capacity))),
            ttl: None,
        }
    }

    /// Entries older than `ttl` are evicted on lookup.
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheHandler for MemoryCache {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, RequestError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_fresh(self.ttl) {
                return Ok(Some(entry.clone()));
            }
            tracing::trace!(target: "reqcycle::cache", key, "entry expired");
            entries.pop(key);
        }
        Ok(None)
    }

    async fn store(&self, key: &str, response: &Response) -> Result<(), RequestError> {
        let entry = CacheEntry::new(key, response.as_cached());
        self.entries.lock().await.put(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), RequestError> {
        self.entries.lock().await.pop(key);
        Ok(())
    }
}
