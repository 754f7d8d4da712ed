//! Built-in feature dispatch.
//!
//! The full command catalog lives outside this crate; these few built-ins
//! keep the pipeline wired to something real: `ping`, `economy`, `timely`.
//! Anything else is ignored.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use shoal_protocol::GatewayCommand;

use crate::economy::{EconomyService, TimelyOutcome};
use crate::pipeline::{DispatchOutcome, Dispatcher, EventContext, StageError};

pub struct BuiltinCommands {
    commands: mpsc::Sender<GatewayCommand>,
    economy: EconomyService,
    prefix: String,
}

impl BuiltinCommands {
    #[must_use]
    pub fn new(
        commands: mpsc::Sender<GatewayCommand>,
        economy: EconomyService,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            commands,
            economy,
            prefix: prefix.into(),
        }
    }

    async fn reply(&self, ctx: &EventContext, content: String) {
        let command = GatewayCommand::SendMessage {
            channel_id: ctx.message.channel_id,
            content,
        };
        if self.commands.send(command).await.is_err() {
            warn!("gateway command channel closed, reply dropped");
        }
    }
}

#[async_trait]
impl Dispatcher for BuiltinCommands {
    async fn dispatch(&self, ctx: &EventContext) -> Result<DispatchOutcome, StageError> {
        let Some(rest) = ctx.payload.strip_prefix(&self.prefix) else {
            return Ok(DispatchOutcome::Ignored);
        };
        let command = rest.split_whitespace().next().unwrap_or("");
        match command {
            "ping" => {
                self.reply(ctx, "pong".to_string()).await;
            }
            "economy" => {
                let snapshot = self
                    .economy
                    .snapshot()
                    .await
                    .map_err(|e| StageError::Other(e.to_string()))?;
                self.reply(
                    ctx,
                    format!(
                        "in circulation: {} | bot reserve: {}",
                        snapshot.circulating, snapshot.reserve
                    ),
                )
                .await;
            }
            "timely" => {
                let author = &ctx.message.author;
                let outcome = self
                    .economy
                    .claim_timely(author.id, &author.name)
                    .await
                    .map_err(|e| StageError::Other(e.to_string()))?;
                let text = match outcome {
                    TimelyOutcome::Disabled => "timely rewards are disabled".to_string(),
                    TimelyOutcome::Granted { amount, balance } => {
                        format!("you received {amount}, your balance is now {balance}")
                    }
                    TimelyOutcome::OnCooldown { remaining } => {
                        format!("already claimed, come back in {}", format_remaining(remaining))
                    }
                };
                self.reply(ctx, text).await;
            }
            _ => return Ok(DispatchOutcome::Ignored),
        }
        Ok(DispatchOutcome::Handled {
            command: command.to_string(),
        })
    }
}

/// Coarse "1h 5m" style rendering for cooldown replies.
fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
