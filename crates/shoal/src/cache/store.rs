//! Cache store contract.
//!
//! The store is shared by every shard process, so anything that carries
//! correctness (claims) must go through the atomic `set_if_absent` rather
//! than a read-then-write sequence.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a cache backend or the layers above it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store cannot be reached. Callers degrade (deny or recompute)
    /// instead of crashing.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// A cached payload could not be encoded or decoded.
    #[error("cache payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An aggregate factory failed while recomputing a missing value.
    #[error("aggregate source failed: {0}")]
    Factory(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CacheError {
    /// Wrap an aggregate factory's own error type.
    pub fn factory(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        CacheError::Factory(Box::new(err))
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store with per-key TTL, atomic test-and-set, and key
/// enumeration.
///
/// Keys are namespaced `{namespace}_{feature}_{subject}` by the layers above
/// so independent deployments can share one store; the store itself treats
/// keys as opaque.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value`, replacing any existing entry. `None` ttl means the
    /// entry never expires on its own.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Atomically store `value` only when `key` is absent (or expired).
    /// Returns true when this call created the entry.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Remaining lifetime of `key`. `None` when the key is absent or has no
    /// expiry.
    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Keys currently matching `pattern`, where `*` matches any run of
    /// characters.
    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>>;
}
