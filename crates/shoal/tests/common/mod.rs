//! Common test utilities.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use shoal::clock::SystemClock;
use shoal::config::Config;
use shoal::coordinator::StandaloneCoordinator;
use shoal::runtime::{FatalError, ShardRuntime};
use shoal::session::GatewayLink;
use shoal_protocol::{
    AccountRef, CoordinatorDirective, GatewayCommand, GatewayEvent, InboundMessage, ReadyData,
    ShardIdentity,
};

/// Account id the fake gateway reports as the logged-in bot.
pub const BOT_USER: u64 = 900;

/// Handles a test holds while a shard runtime runs in the background.
pub struct TestShard {
    pub events: mpsc::Sender<GatewayEvent>,
    pub commands: mpsc::Receiver<GatewayCommand>,
    pub directives: mpsc::Sender<CoordinatorDirective>,
    pub task: JoinHandle<Result<(), FatalError>>,
}

/// Config with timely rewards enabled and the command throttle off.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.economy.timely.amount = 50;
    config.economy.timely.period_hours = 1;
    config.pipeline.command_cooldown_seconds = 0;
    config
}

/// Spawn a standalone shard runtime wired to in-memory gateway channels.
pub fn spawn_shard(config: Config) -> TestShard {
    use tempfile::TempDir;

    let tmp = TempDir::new().unwrap();
    // Leak the TempDir so the database survives for the whole test.
    let tmp = Box::leak(Box::new(tmp));

    let (event_tx, event_rx) = mpsc::channel(64);
    let (command_tx, command_rx) = mpsc::channel(64);
    let (directive_tx, directive_rx) = mpsc::channel(4);

    let runtime = ShardRuntime {
        config,
        db_path: tmp.path().join("economy.db"),
        identity: ShardIdentity::new(0, 1).unwrap(),
        link: GatewayLink {
            events: event_rx,
            commands: command_tx,
        },
        coordinator: Arc::new(StandaloneCoordinator::new()),
        directives: directive_rx,
        clock: Arc::new(SystemClock),
    };

    TestShard {
        events: event_tx,
        commands: command_rx,
        directives: directive_tx,
        task: tokio::spawn(runtime.run()),
    }
}

/// A ready event for the fake bot account.
pub fn ready_event(group_count: u64) -> GatewayEvent {
    GatewayEvent::Ready(Box::new(ReadyData {
        current_user: AccountRef {
            id: BOT_USER,
            name: "shoal".to_string(),
        },
        group_count,
        session_id: None,
    }))
}

/// A group message from a human author.
pub fn user_message(author_id: u64, content: &str) -> GatewayEvent {
    message_from(author_id, content, false)
}

/// A group message authored by a bot account.
pub fn bot_message(author_id: u64, content: &str) -> GatewayEvent {
    message_from(author_id, content, true)
}

fn message_from(author_id: u64, content: &str, author_is_bot: bool) -> GatewayEvent {
    GatewayEvent::MessageReceived(Box::new(InboundMessage {
        message_id: 1,
        channel_id: 42,
        group_id: Some(100),
        author: AccountRef {
            id: author_id,
            name: format!("user-{author_id}"),
        },
        author_is_bot,
        content: content.to_string(),
        timestamp: None,
    }))
}
