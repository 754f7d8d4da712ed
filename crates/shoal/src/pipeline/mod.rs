//! The behavior pipeline.
//!
//! Every inbound message passes through an immutable chain of stages in four
//! roles, always in this order:
//!
//! ```text
//! early interceptors -> input transformers -> late blockers
//!     -> feature dispatch -> late executors
//! ```
//!
//! Interceptors and blockers may veto; transformers rewrite the payload;
//! executors are side-effect-only and individually isolated. The chain is
//! assembled once at startup through [`PipelineBuilder`].

mod chain;
mod roles;
mod stages;

pub use chain::{Pipeline, PipelineBuilder, Processed};
pub use roles::{
    DispatchOutcome, Dispatcher, EarlyInterceptor, EventContext, InputTransformer, LateBlocker,
    LateExecutor, StageError, Verdict,
};
pub use stages::{Blocklist, CommandThrottle, IgnoreBots, MentionPrefix, UsageLog};
