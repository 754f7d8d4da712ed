//! Time-boxed claims over the cache store.
//!
//! A claim is a marker like "user 123 already took the timely reward" that
//! expires on its own. One logical claim exists per `(purpose, subject)` at
//! a time; races are settled by the store's atomic `set_if_absent`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use super::store::{CacheResult, CacheStore};

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Granted,
    AlreadyClaimed { remaining: Duration },
}

/// Issues and checks claims keyed by subject and purpose.
#[derive(Clone)]
pub struct CooldownLedger {
    store: Arc<dyn CacheStore>,
    namespace: String,
}

impl CooldownLedger {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn key(&self, purpose: &str, subject_id: u64) -> String {
        format!("{}_{}_{}", self.namespace, purpose, subject_id)
    }

    /// Take the claim if nobody holds it. A zero `ttl` disables the cooldown
    /// entirely: the call grants without recording anything.
    ///
    /// Errors mean the store could not be reached; callers on money-affecting
    /// paths should treat that as a denial.
    pub async fn try_claim(
        &self,
        subject_id: u64,
        purpose: &str,
        ttl: Duration,
    ) -> CacheResult<ClaimOutcome> {
        if ttl.is_zero() {
            return Ok(ClaimOutcome::Granted);
        }
        let key = self.key(purpose, subject_id);
        if self.store.set_if_absent(&key, vec![1], Some(ttl)).await? {
            return Ok(ClaimOutcome::Granted);
        }
        // The claim can expire between the two calls; report zero remaining
        // rather than pretending it was free.
        let remaining = self
            .store
            .ttl_remaining(&key)
            .await?
            .unwrap_or(Duration::ZERO);
        Ok(ClaimOutcome::AlreadyClaimed { remaining })
    }

    /// Remaining cooldown for an active claim.
    pub async fn time_to_live(
        &self,
        subject_id: u64,
        purpose: &str,
    ) -> CacheResult<Option<Duration>> {
        self.store
            .ttl_remaining(&self.key(purpose, subject_id))
            .await
    }

    /// Best-effort sweep of every claim for `purpose`, returning how many
    /// were deleted. A failed delete is logged and skipped, not escalated.
    pub async fn clear_all(&self, purpose: &str) -> CacheResult<u64> {
        let pattern = format!("{}_{}_*", self.namespace, purpose);
        let keys = self.store.scan(&pattern).await?;
        let deletes = join_all(keys.iter().map(|key| self.store.delete(key))).await;

        let mut cleared = 0;
        for (key, result) in keys.iter().zip(deletes) {
            match result {
                Ok(()) => cleared += 1,
                Err(e) => warn!(key, "failed to clear claim: {e}"),
            }
        }
        Ok(cleared)
    }
}
