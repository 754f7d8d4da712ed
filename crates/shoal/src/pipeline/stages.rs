//! Bundled stages wired in by the runtime.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::{ClaimOutcome, CooldownLedger};

use super::roles::{
    DispatchOutcome, EarlyInterceptor, EventContext, InputTransformer, LateBlocker, LateExecutor,
    StageError, Verdict,
};

const THROTTLE_PURPOSE: &str = "command";

// ============================================================================
// IgnoreBots
// ============================================================================

/// Drops anything written by a bot, our own echoes included.
pub struct IgnoreBots;

#[async_trait]
impl EarlyInterceptor for IgnoreBots {
    fn name(&self) -> &'static str {
        "ignore_bots"
    }

    async fn intercept(&self, ctx: &EventContext) -> Result<Verdict, StageError> {
        if ctx.message.author_is_bot {
            Ok(Verdict::Veto)
        } else {
            Ok(Verdict::Continue)
        }
    }
}

// ============================================================================
// Blocklist
// ============================================================================

/// Drops messages from blocked groups and users before any other work.
pub struct Blocklist {
    groups: HashSet<u64>,
    users: HashSet<u64>,
}

impl Blocklist {
    #[must_use]
    pub fn new(
        groups: impl IntoIterator<Item = u64>,
        users: impl IntoIterator<Item = u64>,
    ) -> Self {
        Self {
            groups: groups.into_iter().collect(),
            users: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EarlyInterceptor for Blocklist {
    fn name(&self) -> &'static str {
        "blocklist"
    }

    async fn intercept(&self, ctx: &EventContext) -> Result<Verdict, StageError> {
        if self.users.contains(&ctx.message.author.id) {
            return Ok(Verdict::Veto);
        }
        if let Some(group_id) = ctx.message.group_id
            && self.groups.contains(&group_id)
        {
            return Ok(Verdict::Veto);
        }
        Ok(Verdict::Continue)
    }
}

// ============================================================================
// MentionPrefix
// ============================================================================

/// Lets `@bot ping` work like `.ping` by rewriting a leading mention of the
/// bot into the canonical prefix.
pub struct MentionPrefix {
    bot_user_id: u64,
    prefix: String,
}

impl MentionPrefix {
    #[must_use]
    pub fn new(bot_user_id: u64, prefix: impl Into<String>) -> Self {
        Self {
            bot_user_id,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl InputTransformer for MentionPrefix {
    fn name(&self) -> &'static str {
        "mention_prefix"
    }

    async fn transform(&self, ctx: &EventContext) -> Result<Option<String>, StageError> {
        // Discord renders nickname mentions as <@!id>.
        let mention = format!("<@{}>", self.bot_user_id);
        let nick_mention = format!("<@!{}>", self.bot_user_id);
        let rest = ctx
            .payload
            .strip_prefix(&mention)
            .or_else(|| ctx.payload.strip_prefix(&nick_mention));
        let Some(rest) = rest else {
            return Ok(None);
        };
        let rest = rest.trim_start();
        if rest.starts_with(&self.prefix) {
            Ok(Some(rest.to_string()))
        } else {
            Ok(Some(format!("{}{}", self.prefix, rest)))
        }
    }
}

// ============================================================================
// CommandThrottle
// ============================================================================

/// Per-user pause between commands, enforced through the shared ledger so
/// the bound holds fleet-wide. Non-command chatter is exempt. A claim check
/// that cannot reach the store denies the command.
pub struct CommandThrottle {
    ledger: CooldownLedger,
    prefix: String,
    cooldown: Duration,
}

impl CommandThrottle {
    #[must_use]
    pub fn new(ledger: CooldownLedger, prefix: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            ledger,
            prefix: prefix.into(),
            cooldown,
        }
    }
}

#[async_trait]
impl LateBlocker for CommandThrottle {
    fn name(&self) -> &'static str {
        "command_throttle"
    }

    async fn block(&self, ctx: &EventContext) -> Result<Verdict, StageError> {
        if !ctx.payload.starts_with(&self.prefix) {
            return Ok(Verdict::Continue);
        }
        match self
            .ledger
            .try_claim(ctx.message.author.id, THROTTLE_PURPOSE, self.cooldown)
            .await
        {
            Ok(ClaimOutcome::Granted) => Ok(Verdict::Continue),
            Ok(ClaimOutcome::AlreadyClaimed { remaining }) => {
                debug!(user = ctx.message.author.id, ?remaining, "command throttled");
                Ok(Verdict::Veto)
            }
            Err(e) => {
                warn!("throttle check failed, denying the command: {e}");
                Ok(Verdict::Veto)
            }
        }
    }
}

// ============================================================================
// UsageLog
// ============================================================================

/// Records every handled command. Clones share one counter, so the runtime
/// can keep one half and hand the other to the pipeline.
#[derive(Clone, Default)]
pub struct UsageLog {
    handled: Arc<AtomicU64>,
}

impl UsageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LateExecutor for UsageLog {
    fn name(&self) -> &'static str {
        "usage_log"
    }

    async fn execute(
        &self,
        ctx: &EventContext,
        outcome: &DispatchOutcome,
    ) -> Result<(), StageError> {
        if let DispatchOutcome::Handled { command } = outcome {
            self.handled.fetch_add(1, Ordering::Relaxed);
            info!(
                %command,
                user = ctx.message.author.id,
                channel = ctx.message.channel_id,
                "command executed"
            );
        }
        Ok(())
    }
}
