//! String-keyed cache used for statistics reports.
//!
//! The engine takes an `Arc<dyn Cache>`. Deployments with an external cache
//! wrap it in [`FallbackCache`] so an unreachable backend degrades to the
//! in-process store instead of failing the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

/// TTL map living in the process.
#[derive(Default)]
pub struct InProcessCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|e| {
            let (value, expires) = e.value();
            (*expires > now).then(|| value.clone())
        });
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        hit
    }

    /// Every write sweeps expired entries, so keys that are never read again
    /// do not pile up.
    fn store(&self, key: &str, value: String, ttl: Duration) {
        self.evict_expired();
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

#[async_trait]
impl Cache for InProcessCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.store(key, value, ttl);
        Ok(())
    }
}

/// Primary cache with an in-process fallback behind the same interface.
pub struct FallbackCache {
    primary: Arc<dyn Cache>,
    fallback: InProcessCache,
}

impl FallbackCache {
    pub fn new(primary: Arc<dyn Cache>) -> Self {
        Self {
            primary,
            fallback: InProcessCache::new(),
        }
    }
}

#[async_trait]
impl Cache for FallbackCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.primary.get(key).await {
            Ok(hit) => Ok(hit),
            Err(e) => {
                tracing::warn!(key, "primary cache get failed, using in-process fallback: {e}");
                metrics::counter!(crate::observability::CACHE_FALLBACKS_TOTAL).increment(1);
                Ok(self.fallback.lookup(key))
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if let Err(e) = self.primary.set(key, value.clone(), ttl).await {
            tracing::warn!(key, "primary cache set failed, using in-process fallback: {e}");
            metrics::counter!(crate::observability::CACHE_FALLBACKS_TOTAL).increment(1);
            self.fallback.store(key, value, ttl);
        }
        Ok(())
    }
}
