//! Stage roles and the dispatch seam.

use async_trait::async_trait;
use thiserror::Error;

use shoal_protocol::InboundMessage;

use crate::cache::CacheError;

/// One inbound message moving through the pipeline. `payload` starts as the
/// raw content; transformers may rewrite it, the original stays on `message`.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub message: InboundMessage,
    pub payload: String,
}

impl EventContext {
    #[must_use]
    pub fn new(message: InboundMessage) -> Self {
        let payload = message.content.clone();
        Self { message, payload }
    }
}

/// Keep going or short-circuit the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Veto,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Other(String),
}

/// What dispatch did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A feature consumed the event.
    Handled { command: String },
    /// Nothing claimed it.
    Ignored,
}

/// Runs before anything else; may veto the event.
#[async_trait]
pub trait EarlyInterceptor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn intercept(&self, ctx: &EventContext) -> Result<Verdict, StageError>;
}

/// Rewrites the payload. `None` means unchanged.
#[async_trait]
pub trait InputTransformer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn transform(&self, ctx: &EventContext) -> Result<Option<String>, StageError>;
}

/// Runs after transforms, right before dispatch; may veto.
#[async_trait]
pub trait LateBlocker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn block(&self, ctx: &EventContext) -> Result<Verdict, StageError>;
}

/// Side effects after dispatch. Failures never affect the event or other
/// executors.
#[async_trait]
pub trait LateExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, ctx: &EventContext, outcome: &DispatchOutcome)
    -> Result<(), StageError>;
}

/// Terminal handler surviving events are dispatched into.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, ctx: &EventContext) -> Result<DispatchOutcome, StageError>;
}
