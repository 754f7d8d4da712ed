//! Economy features the built-in commands are wired to.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{AggregateCache, CacheError, ClaimOutcome, CooldownLedger};
use crate::config::TimelySettings;

use super::store::{BalanceStore, BalanceStoreError};

/// How long a computed economy snapshot stays valid.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(180);

const SNAPSHOT_KEY: &str = "economy";
const TIMELY_PURPOSE: &str = "timely";

#[derive(Debug, Error)]
pub enum EconomyError {
    #[error(transparent)]
    Store(#[from] BalanceStoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Point-in-time view of all balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomySnapshot {
    /// Total held by users.
    pub circulating: i64,
    /// Held by the bot account.
    pub reserve: i64,
}

/// Outcome of a timely stipend claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelyOutcome {
    /// The feature is switched off in config.
    Disabled,
    Granted { amount: i64, balance: i64 },
    OnCooldown { remaining: Duration },
}

/// Balance store plus the shared cache, packaged for feature code.
#[derive(Clone)]
pub struct EconomyService {
    store: Arc<dyn BalanceStore>,
    ledger: CooldownLedger,
    aggregates: AggregateCache,
    bot_account: u64,
    timely: TimelySettings,
}

impl EconomyService {
    #[must_use]
    pub fn new(
        store: Arc<dyn BalanceStore>,
        ledger: CooldownLedger,
        aggregates: AggregateCache,
        bot_account: u64,
        timely: TimelySettings,
    ) -> Self {
        Self {
            store,
            ledger,
            aggregates,
            bot_account,
            timely,
        }
    }

    /// Aggregate view of the economy, cached for [`SNAPSHOT_TTL`]. A cache
    /// outage only forces a recompute; a store outage is an error.
    pub async fn snapshot(&self) -> Result<EconomySnapshot, EconomyError> {
        let store = Arc::clone(&self.store);
        let bot_account = self.bot_account;
        let snapshot = self
            .aggregates
            .get_or_compute(SNAPSHOT_KEY, SNAPSHOT_TTL, || async move {
                let circulating = store
                    .total_balance_excluding(bot_account)
                    .await
                    .map_err(CacheError::factory)?;
                let reserve = store
                    .balance_of(bot_account)
                    .await
                    .map_err(CacheError::factory)?;
                Ok(Some(EconomySnapshot {
                    circulating,
                    reserve,
                }))
            })
            .await?;
        Ok(snapshot.unwrap_or_default())
    }

    /// Claim the periodic stipend. At most one grant per configured period,
    /// enforced through the shared ledger so the bound holds across shards.
    pub async fn claim_timely(
        &self,
        account_id: u64,
        name: &str,
    ) -> Result<TimelyOutcome, EconomyError> {
        if self.timely.amount <= 0 || self.timely.period_hours == 0 {
            return Ok(TimelyOutcome::Disabled);
        }
        let period = Duration::from_secs(u64::from(self.timely.period_hours) * 3600);
        match self
            .ledger
            .try_claim(account_id, TIMELY_PURPOSE, period)
            .await?
        {
            ClaimOutcome::Granted => {
                let balance = self
                    .store
                    .deposit(account_id, name, self.timely.amount)
                    .await?;
                Ok(TimelyOutcome::Granted {
                    amount: self.timely.amount,
                    balance,
                })
            }
            ClaimOutcome::AlreadyClaimed { remaining } => {
                Ok(TimelyOutcome::OnCooldown { remaining })
            }
        }
    }
}
