//! InMemoryCache - process-local stand-in for the shared key-value cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::store::{cache_key, CacheError, CacheStore};

struct CachedValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// In-memory cache with per-entry expiry.
///
/// Expiry uses `tokio::time`, so tests can drive TTLs with a paused clock.
/// Expired entries are evicted lazily on access. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, CachedValue>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache server going away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether a live entry exists for the key.
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| {
                entries
                    .get(&cache_key(namespace, key))
                    .map(|value| value.is_live(now))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|v| v.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_available()?;
        let key = cache_key(namespace, key);
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("get"))?;

        match entries.get(&key) {
            Some(value) if value.is_live(now) => Ok(Some(value.bytes.clone())),
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.ensure_available()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("set"))?;
        entries.insert(
            cache_key(namespace, key),
            CachedValue {
                bytes: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, namespace: &str, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned("expire"))?;

        match entries.get_mut(&cache_key(namespace, key)) {
            Some(value) if value.is_live(now) => {
                value.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
