//! Balance store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Name of the durable decay checkpoint row.
pub const DECAY_CHECKPOINT: &str = "currency_decay";

#[derive(Debug, Error)]
pub enum BalanceStoreError {
    #[error("balance database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("balance database io: {0}")]
    Io(#[from] std::io::Error),

    /// The store's worker task is gone; nothing can be served anymore.
    #[error("balance store closed")]
    Closed,
}

pub type BalanceResult<T> = Result<T, BalanceStoreError>;

/// Parameters for one bulk decay application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayRequest {
    /// Fraction of each balance to remove, in `(0, 1]`.
    pub percent: f64,
    /// Upper bound per account; `0` means uncapped.
    pub max_amount: i64,
    /// Only balances strictly above this decay.
    pub min_threshold: i64,
    /// Account left untouched (the bot's own holdings).
    pub excluded_account: u64,
    /// Timestamp written to the durable checkpoint alongside the update.
    pub applied_at: DateTime<Utc>,
}

/// Durable account balances shared by the whole fleet.
///
/// The runtime needs only a handful of query shapes; anything richer belongs
/// to feature code outside this crate.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Create the account row when missing, refreshing the stored name.
    async fn ensure_account(&self, account_id: u64, name: &str) -> BalanceResult<()>;

    /// Add `amount` to the account, creating it when missing. Returns the
    /// new balance.
    async fn deposit(&self, account_id: u64, name: &str, amount: i64) -> BalanceResult<i64>;

    async fn balance_of(&self, account_id: u64) -> BalanceResult<i64>;

    /// Total circulating balance, excluding the reserved account.
    async fn total_balance_excluding(&self, account_id: u64) -> BalanceResult<i64>;

    /// Apply one proportional decrement to every eligible account as a
    /// single bulk statement, advancing the durable decay checkpoint in the
    /// same transaction. Returns the number of accounts touched.
    async fn apply_decay(&self, request: DecayRequest) -> BalanceResult<u64>;

    /// Durable copy of a named checkpoint, when one was ever written.
    async fn checkpoint(&self, name: &str) -> BalanceResult<Option<DateTime<Utc>>>;
}
