//! Discord connector for shoal, built on serenity.
//!
//! Translates serenity's callbacks into [`GatewayEvent`]s on one channel and
//! consumes [`GatewayCommand`]s from another. Reconnects and backoff stay
//! inside serenity; the runtime only sees connection-state transitions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Timelike;

use serenity::all::{
    ChannelId, ConnectionStage, CreateMessage, GatewayIntents, Guild, Ready,
    ShardStageUpdateEvent, UnavailableGuild,
};
use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use shoal_protocol::{
    AccountRef, FaultKind, GatewayCommand, GatewayEvent, GroupInfo, InboundMessage, ReadyData,
};

/// Discord message character limit.
const MAX_MESSAGE_LENGTH: usize = 2000;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub shard_id: u32,
    pub total_shards: u32,
}

impl DiscordConfig {
    #[must_use]
    pub fn new(token: impl Into<String>, shard_id: u32, total_shards: u32) -> Self {
        Self {
            token: token.into(),
            shard_id,
            total_shards,
        }
    }
}

// ============================================================================
// Discord Gateway
// ============================================================================

/// One shard's connection to Discord.
pub struct DiscordGateway {
    config: DiscordConfig,
}

impl DiscordGateway {
    #[must_use]
    pub fn new(config: DiscordConfig) -> Self {
        Self { config }
    }

    /// Run the connector and communicate via the provided channels.
    ///
    /// Blocks until [`GatewayCommand::Disconnect`] arrives or the client
    /// hits an unrecoverable error.
    pub async fn start(
        self,
        events: mpsc::Sender<GatewayEvent>,
        mut commands: mpsc::Receiver<GatewayCommand>,
    ) {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let direct_channels = Arc::new(Mutex::new(HashSet::new()));
        let handler = Handler {
            events: events.clone(),
            direct_channels: direct_channels.clone(),
        };

        let mut client = match Client::builder(&self.config.token, intents)
            .event_handler(handler)
            .await
        {
            Ok(client) => client,
            Err(error) => {
                error!(error = %error, "failed to build discord client");
                send_fault(&events, &error).await;
                return;
            }
        };

        // Handles must be taken before start_shard borrows the client.
        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();
        let command_task = tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    GatewayCommand::SendMessage {
                        channel_id,
                        content,
                    } => {
                        if let Err(error) = send_message(&http, channel_id, &content).await {
                            warn!(channel_id, error = %error, "message send failed");
                        }
                    }

                    GatewayCommand::CloseDirectSessions => {
                        let tracked: Vec<u64> = {
                            let mut channels = direct_channels.lock().expect("mutex poisoned");
                            channels.drain().collect()
                        };
                        for channel in &tracked {
                            let _ = ChannelId::new(*channel).delete(&http).await;
                        }
                        debug!(count = tracked.len(), "direct sessions closed");
                    }

                    GatewayCommand::Disconnect => {
                        info!("disconnect requested");
                        shard_manager.shutdown_all().await;
                        break;
                    }
                }
            }
            debug!("command handler stopped");
        });

        info!(
            shard_id = self.config.shard_id,
            total_shards = self.config.total_shards,
            "starting discord client"
        );
        if let Err(error) = client
            .start_shard(self.config.shard_id, self.config.total_shards)
            .await
        {
            error!(error = %error, "discord client error");
            send_fault(&events, &error).await;
        }

        command_task.abort();
        info!("discord gateway stopped");
    }
}

async fn send_fault(events: &mpsc::Sender<GatewayEvent>, error: &serenity::Error) {
    let fault = GatewayEvent::Fault {
        kind: classify(error),
        message: error.to_string(),
    };
    let _ = events.send(fault).await;
}

/// Rejected credentials get their own fault class; everything else the
/// client could not recover from is transport.
fn classify(error: &serenity::Error) -> FaultKind {
    match error {
        serenity::Error::Gateway(serenity::gateway::GatewayError::InvalidAuthentication) => {
            FaultKind::Auth
        }
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 401 =>
        {
            FaultKind::Auth
        }
        _ => FaultKind::Transport,
    }
}

// ============================================================================
// Event Handler
// ============================================================================

struct Handler {
    events: mpsc::Sender<GatewayEvent>,
    /// Direct-message channels seen on this connection, closable on demand.
    direct_channels: Arc<Mutex<HashSet<u64>>>,
}

impl Handler {
    async fn forward(&self, event: GatewayEvent) {
        if self.events.send(event).await.is_err() {
            warn!("event channel closed, event dropped");
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.guild_id.is_none() {
            self.direct_channels
                .lock()
                .expect("mutex poisoned")
                .insert(msg.channel_id.get());
        }

        // Bot-authored messages are forwarded too; the pipeline vetoes them.
        let event = GatewayEvent::MessageReceived(Box::new(InboundMessage {
            message_id: msg.id.get(),
            channel_id: msg.channel_id.get(),
            group_id: msg.guild_id.map(|id| id.get()),
            author: AccountRef {
                id: msg.author.id.get(),
                name: msg.author.name.clone(),
            },
            author_is_bot: msg.author.bot,
            content: msg.content.clone(),
            timestamp: {
                let ts = msg.timestamp;
                chrono::DateTime::from_timestamp(ts.unix_timestamp(), ts.nanosecond())
            },
        }));
        self.forward(event).await;
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            user_id = %ready.user.id,
            "discord session established"
        );
        let data = ReadyData {
            current_user: AccountRef {
                id: ready.user.id.get(),
                name: ready.user.name.clone(),
            },
            group_count: ready.guilds.len() as u64,
            session_id: Some(ready.session_id.clone()),
        };
        self.forward(GatewayEvent::Ready(Box::new(data))).await;
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        let update = match event.new {
            ConnectionStage::Connected => GatewayEvent::Connected,
            ConnectionStage::Disconnected => GatewayEvent::Disconnected { reason: None },
            _ => return,
        };
        self.forward(update).await;
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        // Startup cache fills arrive with is_new unset or false; the ready
        // event already carried those in its count.
        if is_new != Some(true) {
            return;
        }
        let info = GroupInfo {
            id: guild.id.get(),
            name: guild.name.clone(),
            member_count: Some(guild.member_count),
        };
        self.forward(GatewayEvent::GroupJoined(info)).await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, full: Option<Guild>) {
        // An unavailable guild is an outage, not a removal.
        if incomplete.unavailable {
            return;
        }
        let info = GroupInfo {
            id: incomplete.id.get(),
            name: full.map(|guild| guild.name).unwrap_or_default(),
            member_count: None,
        };
        self.forward(GatewayEvent::GroupLeft(info)).await;
    }
}

// ============================================================================
// Command Execution
// ============================================================================

async fn send_message(
    http: &Arc<serenity::http::Http>,
    channel_id: u64,
    content: &str,
) -> Result<(), String> {
    if channel_id == 0 {
        return Err("invalid channel id".to_string());
    }
    let channel = ChannelId::new(channel_id);

    for chunk in chunk_message(content) {
        channel
            .send_message(http, CreateMessage::new().content(chunk))
            .await
            .map_err(|e| e.to_string())?;
    }

    Ok(())
}

fn chunk_message(content: &str) -> Vec<&str> {
    if content.len() <= MAX_MESSAGE_LENGTH {
        return vec![content];
    }

    let mut chunks = Vec::new();
    let mut remaining = content;

    while !remaining.is_empty() {
        if remaining.len() <= MAX_MESSAGE_LENGTH {
            chunks.push(remaining);
            break;
        }

        let mut boundary = MAX_MESSAGE_LENGTH;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        // Prefer a newline within the limit, but never emit an empty chunk.
        let split_at = remaining[..boundary]
            .rfind('\n')
            .filter(|&at| at > 0)
            .unwrap_or(boundary);

        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        // Skip the newline if we split at one
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }

    chunks
}
