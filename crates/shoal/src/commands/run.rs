//! `shoal run`: drive one shard until shutdown or a fatal fault.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;

use shoal::clock::SystemClock;
use shoal::config::{self, Config};
use shoal::coordinator;
use shoal::runtime::ShardRuntime;
use shoal_protocol::ShardIdentity;

const DIRECTIVE_BUFFER: usize = 4;

pub async fn run(
    config_path: &str,
    shard_id_override: Option<u32>,
    total_shards_override: Option<u32>,
) -> Result<()> {
    let mut config = Config::load(config_path).await?;

    // CLI overrides config
    if let Some(id) = shard_id_override {
        config.shard.id = id;
    }
    if let Some(total) = total_shards_override {
        config.shard.total = total;
    }
    let identity = ShardIdentity::new(config.shard.id, config.shard.total)?;

    let config_path_ref = Path::new(config_path);
    let db_path = config
        .economy
        .db_path
        .as_ref()
        .map(|p| config::resolve_path(config_path_ref, p))
        .unwrap_or_else(|| {
            config::resolve_path(config_path_ref, Path::new(config::DEFAULT_DB_PATH))
        });

    let started_at = Utc::now();
    let (directive_tx, directive_rx) = mpsc::channel(DIRECTIVE_BUFFER);
    let coordinator =
        coordinator::from_env(&config.coordinator, identity, started_at, directive_tx)
            .await
            .context("coordinator selection")?;

    let link = gateway::start(&config, identity)?;

    let runtime = ShardRuntime {
        config,
        db_path,
        identity,
        link,
        coordinator,
        directives: directive_rx,
        clock: Arc::new(SystemClock),
    };
    runtime.run().await?;
    Ok(())
}

#[cfg(feature = "gateway-discord")]
mod gateway {
    use anyhow::{Result, bail};
    use shoal::config::Config;
    use shoal::session::GatewayLink;
    use shoal_gateway_discord::{DiscordConfig, DiscordGateway};
    use shoal_protocol::ShardIdentity;
    use tokio::sync::mpsc;
    use tracing::info;

    const EVENT_BUFFER: usize = 256;
    const COMMAND_BUFFER: usize = 64;

    /// Start the Discord connector in a background task and hand back the
    /// channel halves the session consumes.
    pub fn start(config: &Config, identity: ShardIdentity) -> Result<GatewayLink> {
        let Some(discord) = config.gateway.discord.as_ref() else {
            bail!("gateway.discord is not configured");
        };
        if discord.token.is_empty() {
            bail!("gateway.discord.token is empty");
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let gateway = DiscordGateway::new(DiscordConfig::new(
            &discord.token,
            identity.shard_id(),
            identity.total_shards(),
        ));
        tokio::spawn(async move {
            gateway.start(event_tx, command_rx).await;
        });

        info!("discord gateway started");
        Ok(GatewayLink {
            events: event_rx,
            commands: command_tx,
        })
    }
}

#[cfg(not(feature = "gateway-discord"))]
mod gateway {
    use anyhow::{Result, bail};
    use shoal::config::Config;
    use shoal::session::GatewayLink;
    use shoal_protocol::ShardIdentity;

    pub fn start(_config: &Config, _identity: ShardIdentity) -> Result<GatewayLink> {
        bail!("built without a gateway connector (enable the gateway-discord feature)");
    }
}
