//! Shard lifecycle: one session task per process driving login, readiness,
//! reconnects, and fault escalation over the gateway link.

mod shard;
mod state;

pub use shard::{GatewayLink, GroupEvent, SessionEnd, SessionHandle, ShardSession, ShardSnapshot};
