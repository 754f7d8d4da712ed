//! Durable balances and the features built on them: the sqlite-backed
//! store, the snapshot/timely service, and the shard 0 decay job.

mod decay;
mod service;
mod sqlite;
mod store;

pub use decay::{DecayScheduler, TickOutcome};
pub use service::{EconomyError, EconomyService, EconomySnapshot, SNAPSHOT_TTL, TimelyOutcome};
pub use sqlite::SqliteBalanceStore;
pub use store::{BalanceResult, BalanceStore, BalanceStoreError, DECAY_CHECKPOINT, DecayRequest};
