//! Fleet coordination.
//!
//! A shard either runs on its own or under a coordination service that
//! tracks registrations, collects heartbeats, and pushes restart/shutdown
//! directives. Both modes implement [`Coordinator`]; the environment toggle
//! [`COORDINATED_ENV`] picks one at startup.

mod remote;
mod standalone;

pub use remote::RemoteCoordinator;
pub use standalone::StandaloneCoordinator;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use shoal_protocol::{CoordinatorDirective, ShardIdentity, ShardState};

use crate::config::CoordinatorSettings;

/// Environment toggle selecting the remote coordinator. Any non-empty value
/// means coordinated; absent (or empty) means standalone.
pub const COORDINATED_ENV: &str = "SHOAL_COORDINATED";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordination link is down")]
    LinkDown,

    #[error("restart requires a coordination service")]
    RestartUnsupported,

    #[error("failed to reach the coordination service: {0}")]
    Connect(#[from] std::io::Error),
}

/// Registration, liveness, and restart directives for one shard.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Announce this shard to the authority. Called once the gateway session
    /// reports ready.
    async fn register(&self) -> Result<(), CoordinatorError>;

    /// Report the current lifecycle state. Sent on every heartbeat tick and
    /// on state transitions.
    async fn report_state(
        &self,
        state: ShardState,
        group_count: u64,
    ) -> Result<(), CoordinatorError>;

    /// Ask the supervisor to restart this shard.
    async fn request_restart(&self) -> Result<(), CoordinatorError>;

    /// Whether the authority is still reachable.
    fn is_alive(&self) -> bool;
}

/// Compose the coordinator selected by the [`COORDINATED_ENV`] toggle.
pub async fn from_env(
    settings: &CoordinatorSettings,
    shard: ShardIdentity,
    started_at: DateTime<Utc>,
    directive_tx: mpsc::Sender<CoordinatorDirective>,
) -> Result<Arc<dyn Coordinator>, CoordinatorError> {
    let toggle = std::env::var(COORDINATED_ENV).ok();
    select(toggle, settings, shard, started_at, directive_tx).await
}

/// [`from_env`] with the toggle passed explicitly.
pub async fn select(
    toggle: Option<String>,
    settings: &CoordinatorSettings,
    shard: ShardIdentity,
    started_at: DateTime<Utc>,
    directive_tx: mpsc::Sender<CoordinatorDirective>,
) -> Result<Arc<dyn Coordinator>, CoordinatorError> {
    match toggle.filter(|value| !value.is_empty()) {
        Some(_) => {
            let remote =
                RemoteCoordinator::connect(settings, shard, started_at, directive_tx).await?;
            Ok(Arc::new(remote))
        }
        None => Ok(Arc::new(StandaloneCoordinator::new())),
    }
}
