//! Periodic currency decay.
//!
//! One scheduler exists per fleet, on shard 0. Each tick it checks the
//! cached "last ran" checkpoint and, when the configured interval has
//! elapsed, shrinks every large balance by one bulk statement.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::AggregateCache;
use crate::clock::Clock;
use crate::config::DecaySettings;

use super::service::EconomyError;
use super::store::{BalanceStore, DECAY_CHECKPOINT, DecayRequest};

/// What one scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Config keeps the job off.
    Disabled,
    /// The minimum interval has not elapsed yet.
    NotDue,
    /// The bulk update committed.
    Applied { affected: u64 },
    /// The gate was unreadable or the update failed; nothing advanced.
    Skipped,
}

pub struct DecayScheduler {
    store: Arc<dyn BalanceStore>,
    aggregates: AggregateCache,
    clock: Arc<dyn Clock>,
    settings: DecaySettings,
    bot_account: u64,
}

impl DecayScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn BalanceStore>,
        aggregates: AggregateCache,
        clock: Arc<dyn Clock>,
        settings: DecaySettings,
        bot_account: u64,
    ) -> Self {
        Self {
            store,
            aggregates,
            clock,
            settings,
            bot_account,
        }
    }

    /// Copy the durable checkpoint into the cache when the cache has none.
    /// Without this, a cold cache would read as "never ran" and decay early.
    pub async fn seed_checkpoint(&self) -> Result<(), EconomyError> {
        if self.aggregates.checkpoint_exists(DECAY_CHECKPOINT).await? {
            return Ok(());
        }
        if let Some(at) = self.store.checkpoint(DECAY_CHECKPOINT).await? {
            self.aggregates.set_checkpoint(DECAY_CHECKPOINT, at).await?;
            debug!(%at, "seeded decay checkpoint from the durable store");
        }
        Ok(())
    }

    /// One gate check and, when due, one decay application.
    pub async fn run_once(&self) -> TickOutcome {
        let settings = self.settings;
        if settings.percent <= 0.0 || settings.percent > 1.0 || settings.max_amount < 0 {
            return TickOutcome::Disabled;
        }

        let last = match self.aggregates.checkpoint(DECAY_CHECKPOINT).await {
            Ok(at) => at,
            Err(e) => {
                warn!("decay gate unreadable, skipping tick: {e}");
                return TickOutcome::Skipped;
            }
        };
        let now = self.clock.now();
        if now - last < TimeDelta::hours(i64::from(settings.interval_hours)) {
            return TickOutcome::NotDue;
        }

        let request = DecayRequest {
            percent: settings.percent,
            max_amount: settings.max_amount,
            min_threshold: settings.min_threshold,
            excluded_account: self.bot_account,
            applied_at: now,
        };
        let affected = match self.store.apply_decay(request).await {
            Ok(n) => n,
            Err(e) => {
                // Checkpoint untouched, so the next tick retries.
                warn!("decay application failed: {e}");
                return TickOutcome::Skipped;
            }
        };
        // The durable row advanced inside the update's transaction; the
        // cached gate follows after commit.
        if let Err(e) = self
            .aggregates
            .set_checkpoint(DECAY_CHECKPOINT, now)
            .await
        {
            warn!("decay applied but the gate checkpoint write failed: {e}");
        }
        info!(
            affected,
            percent = settings.percent,
            "applied currency decay"
        );
        TickOutcome::Applied { affected }
    }

    /// Spawn the periodic loop. The first gate check happens one full tick
    /// after startup.
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.settings.tick_seconds.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // skip immediate tick
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("decay scheduler stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let outcome = self.run_once().await;
                        debug!(?outcome, "decay tick");
                    }
                }
            }
        })
    }
}
