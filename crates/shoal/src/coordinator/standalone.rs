//! No-op coordinator for unmanaged single-process deployments.

use async_trait::async_trait;
use tracing::debug;

use shoal_protocol::ShardState;

use super::{Coordinator, CoordinatorError};

#[derive(Debug, Default, Clone, Copy)]
pub struct StandaloneCoordinator;

impl StandaloneCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Coordinator for StandaloneCoordinator {
    async fn register(&self) -> Result<(), CoordinatorError> {
        debug!("standalone mode, registration skipped");
        Ok(())
    }

    async fn report_state(
        &self,
        state: ShardState,
        group_count: u64,
    ) -> Result<(), CoordinatorError> {
        debug!(%state, group_count, "standalone heartbeat");
        Ok(())
    }

    async fn request_restart(&self) -> Result<(), CoordinatorError> {
        Err(CoordinatorError::RestartUnsupported)
    }

    fn is_alive(&self) -> bool {
        true
    }
}
