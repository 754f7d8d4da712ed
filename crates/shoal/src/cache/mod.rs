//! Shared hot state between shard processes.
//!
//! Layered smallest-to-largest:
//!
//! ```text
//! CacheStore (get/set/set_if_absent/ttl/delete/scan)
//!   ├── CooldownLedger   time-boxed claims (rate limits, rewards)
//!   └── AggregateCache   memoized aggregates + job checkpoints
//! ```
//!
//! Shards do not share memory; everything that must be consistent across
//! processes lives behind [`CacheStore`]. The in-memory implementation
//! serves single-process deployments and tests.

mod aggregates;
mod ledger;
mod memory;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregates::AggregateCache;
pub use ledger::{ClaimOutcome, CooldownLedger};
pub use memory::MemoryStore;
pub use store::{CacheError, CacheResult, CacheStore};
