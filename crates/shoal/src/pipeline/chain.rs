//! The ordered stage chain.
//!
//! Role order is fixed: early interceptors, input transformers, late
//! blockers, dispatch, late executors. Within a role, stages run in
//! registration order. The chain is immutable once built; distinct events
//! are processed concurrently by running each on its own task.

use tracing::{debug, warn};

use shoal_protocol::InboundMessage;

use super::roles::{
    DispatchOutcome, Dispatcher, EarlyInterceptor, EventContext, InputTransformer, LateBlocker,
    LateExecutor, Verdict,
};

/// How one event left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// An early interceptor vetoed it.
    VetoedEarly { stage: &'static str },
    /// A late blocker vetoed it.
    VetoedLate { stage: &'static str },
    /// A stage failed and the event was abandoned.
    Aborted { stage: &'static str },
    /// It reached dispatch.
    Dispatched(DispatchOutcome),
}

#[derive(Default)]
pub struct PipelineBuilder {
    early: Vec<Box<dyn EarlyInterceptor>>,
    transformers: Vec<Box<dyn InputTransformer>>,
    blockers: Vec<Box<dyn LateBlocker>>,
    executors: Vec<Box<dyn LateExecutor>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn early(mut self, stage: impl EarlyInterceptor + 'static) -> Self {
        self.early.push(Box::new(stage));
        self
    }

    #[must_use]
    pub fn transformer(mut self, stage: impl InputTransformer + 'static) -> Self {
        self.transformers.push(Box::new(stage));
        self
    }

    #[must_use]
    pub fn blocker(mut self, stage: impl LateBlocker + 'static) -> Self {
        self.blockers.push(Box::new(stage));
        self
    }

    #[must_use]
    pub fn executor(mut self, stage: impl LateExecutor + 'static) -> Self {
        self.executors.push(Box::new(stage));
        self
    }

    #[must_use]
    pub fn build(self, dispatcher: impl Dispatcher + 'static) -> Pipeline {
        Pipeline {
            early: self.early,
            transformers: self.transformers,
            blockers: self.blockers,
            executors: self.executors,
            dispatcher: Box::new(dispatcher),
        }
    }
}

pub struct Pipeline {
    early: Vec<Box<dyn EarlyInterceptor>>,
    transformers: Vec<Box<dyn InputTransformer>>,
    blockers: Vec<Box<dyn LateBlocker>>,
    executors: Vec<Box<dyn LateExecutor>>,
    dispatcher: Box<dyn Dispatcher>,
}

impl Pipeline {
    /// Run one message through the whole chain.
    pub async fn process(&self, message: InboundMessage) -> Processed {
        let mut ctx = EventContext::new(message);

        for stage in &self.early {
            match stage.intercept(&ctx).await {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Veto) => {
                    debug!(stage = stage.name(), "event vetoed early");
                    return Processed::VetoedEarly { stage: stage.name() };
                }
                Err(e) => {
                    warn!(stage = stage.name(), "early interceptor failed: {e}");
                    return Processed::Aborted { stage: stage.name() };
                }
            }
        }

        for stage in &self.transformers {
            match stage.transform(&ctx).await {
                Ok(Some(payload)) => ctx.payload = payload,
                Ok(None) => {}
                Err(e) => {
                    warn!(stage = stage.name(), "input transformer failed: {e}");
                    return Processed::Aborted { stage: stage.name() };
                }
            }
        }

        for stage in &self.blockers {
            match stage.block(&ctx).await {
                Ok(Verdict::Continue) => {}
                Ok(Verdict::Veto) => {
                    debug!(stage = stage.name(), "event vetoed late");
                    return Processed::VetoedLate { stage: stage.name() };
                }
                Err(e) => {
                    warn!(stage = stage.name(), "late blocker failed: {e}");
                    return Processed::Aborted { stage: stage.name() };
                }
            }
        }

        let outcome = match self.dispatcher.dispatch(&ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("dispatch failed: {e}");
                DispatchOutcome::Ignored
            }
        };

        for stage in &self.executors {
            if let Err(e) = stage.execute(&ctx, &outcome).await {
                warn!(stage = stage.name(), "late executor failed: {e}");
            }
        }

        Processed::Dispatched(outcome)
    }
}
