//! CacheStore - the key-value cache boundary.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl CacheError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

/// Build the wire key for an entry: `"{namespace}:{key}"`.
pub fn cache_key(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

/// Shared key-value cache.
///
/// Every method maps to one atomic remote command, so implementations need
/// no client-side locking.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries read as `None`.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store an entry, replacing any previous value. `ttl = None` never expires.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Reset the time-to-live of an existing entry. Returns whether it existed.
    async fn expire(&self, namespace: &str, key: &str, ttl: Duration) -> Result<bool, CacheError>;
}
