//! Memoized aggregates and named job checkpoints over the cache store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::{CacheResult, CacheStore};

/// Bumped whenever the serialized shape of any cached aggregate changes.
/// Entries written under another version are treated as misses.
const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    v: u32,
    payload: T,
}

/// Lazy, ttl-bounded memoization of expensive aggregates, plus named
/// "last ran" timestamps for periodic jobs.
///
/// There is no single-flight guarantee: two shards missing at once both
/// recompute, which is fine because factories are read-only.
#[derive(Clone)]
pub struct AggregateCache {
    store: Arc<dyn CacheStore>,
    namespace: String,
}

impl AggregateCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}_{}", self.namespace, name)
    }

    /// Return the cached value for `name`, or compute, cache, and return it.
    ///
    /// An empty factory result is handed back uncached so the next call
    /// retries. A stored payload that fails to decode, or that carries
    /// another schema version, counts as a miss. Store outages degrade to
    /// computing directly; only the factory's own failure is an error here.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        name: &str,
        ttl: Duration,
        factory: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<T>>>,
    {
        let key = self.key(name);
        let cached = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, "cache read failed, computing directly: {e}");
                None
            }
        };
        if let Some(bytes) = cached {
            match serde_json::from_slice::<Envelope<T>>(&bytes) {
                Ok(envelope) if envelope.v == SCHEMA_VERSION => {
                    return Ok(Some(envelope.payload));
                }
                Ok(envelope) => {
                    debug!(key, version = envelope.v, "cached aggregate from another schema");
                }
                Err(e) => debug!(key, "cached aggregate failed to decode: {e}"),
            }
        }

        let Some(value) = factory().await? else {
            return Ok(None);
        };
        let envelope = Envelope {
            v: SCHEMA_VERSION,
            payload: &value,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        if let Err(e) = self.store.set(&key, bytes, Some(ttl)).await {
            warn!(key, "cache write failed, value stays uncached: {e}");
        }
        Ok(Some(value))
    }

    /// Named "last ran" timestamp. Absent means the Unix epoch, so a fresh
    /// deployment runs its job on the first eligible tick.
    ///
    /// Unlike aggregates this does not fail open: a gate that cannot be read
    /// must not be guessed at.
    pub async fn checkpoint(&self, name: &str) -> CacheResult<DateTime<Utc>> {
        match self.store.get(&self.key(name)).await? {
            None => Ok(DateTime::UNIX_EPOCH),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    pub async fn set_checkpoint(&self, name: &str, at: DateTime<Utc>) -> CacheResult<()> {
        let bytes = serde_json::to_vec(&at)?;
        self.store.set(&self.key(name), bytes, None).await
    }

    /// Whether a checkpoint was ever written (as opposed to the epoch
    /// default).
    pub async fn checkpoint_exists(&self, name: &str) -> CacheResult<bool> {
        Ok(self.store.get(&self.key(name)).await?.is_some())
    }
}
