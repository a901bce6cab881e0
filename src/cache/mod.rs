//! Cache-aside reads.
//!
//! ```text
//! get(id) ──► CacheStore ──hit──► snapshot
//!                 │
//!                miss
//!                 ▼
//!            Repository ──found──► set(kind, id, snapshot, ttl) ──► entity
//! ```
//!
//! Writes bypass the cache entirely. Staleness is bounded only by the TTL.

mod in_memory;
mod repository;
mod store;

pub use in_memory::InMemoryCache;
pub use repository::CachedRepository;
pub use store::{cache_key, CacheError, CacheStore};
