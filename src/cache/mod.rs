//! Response cache seam.
//!
//! The engine only needs keyed lookup and store. Storage is the handler's
//! business; `MemoryCache` is the bundled in-process implementation.
//! Handler errors are logged by the engine and never fail a request.

mod memory;

pub use memory::MemoryCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::response::Response;

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, response: Response) -> Self {
        Self {
            key: key.into(),
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }

    /// An entry with no age limit is always fresh.
    pub fn is_fresh(&self, max_age: Option<Duration>) -> bool {
        max_age.is_none_or(|max| self.age() <= max)
    }
}

/// Keyed response storage. Implementations must be safe to call from any
/// worker thread; the last store for a key wins.
#[async_trait]
pub trait CacheHandler: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, RequestError>;

    async fn store(&self, key: &str, response: &Response) -> Result<(), RequestError>;

    /// Drop the entry for `key`. The engine calls this when a successful
    /// response is refused by the request's `should_cache` predicate.
    async fn remove(&self, _key: &str) -> Result<(), RequestError> {
        Ok(())
    }
}

/// How a request reads the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheReadMode {
    /// Never consult the cache.
    #[default]
    None,
    /// Deliver a hit through the cache-hit callback, then go to the network.
    AlsoNetwork,
    /// A hit completes the request from the cache and the network is skipped.
    /// A miss falls through to the network.
    CacheOnly,
}

pub type ShouldCache = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Per-request cache behaviour.
#[derive(Clone, Default)]
pub struct CacheOptions {
    pub read_mode: CacheReadMode,
    /// Store successful network responses.
    pub write: bool,
    /// Entries older than this are treated as misses.
    pub max_age: Option<Duration>,
    /// Extra component appended to the identifier to form the cache key
    /// (e.g. a user id when responses differ per account).
    pub extra_key: Option<String>,
    pub should_cache: Option<ShouldCache>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read with `AlsoNetwork` and write successful responses.
    pub fn read_write() -> Self {
        Self {
            read_mode: CacheReadMode::AlsoNetwork,
            write: true,
            ..Default::default()
        }
    }

    pub const fn with_read_mode(mut self, mode: CacheReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    pub const fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_extra_key(mut self, extra: impl Into<String>) -> Self {
        self.extra_key = Some(extra.into());
        self
    }

    pub fn with_should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Some(Arc::new(predicate));
        self
    }

    pub fn reads(&self) -> bool {
        self.read_mode != CacheReadMode::None
    }

    pub fn cache_key(&self, identifier: &str) -> String {
        match &self.extra_key {
            Some(extra) if !extra.is_empty() => format!("{identifier} #{extra}"),
            _ => identifier.to_string(),
        }
    }

    /// Whether `response` should be written back.
    pub fn accepts(&self, response: &Response) -> bool {
        self.write
            && response.is_success()
            && self.should_cache.as_ref().is_none_or(|f| f(response))
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("read_mode", &self.read_mode)
            .field("write", &self.write)
            .field("max_age", &self.max_age)
            .field("extra_key", &self.extra_key)
            .field("should_cache", &self.should_cache.is_some())
            .finish()
    }
}
