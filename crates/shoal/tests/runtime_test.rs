//! Integration tests for the shard runtime: full event-to-command round
//! trips over fake gateway channels, directive handling, and fatal exits.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use shoal::runtime::FatalError;
use shoal_protocol::{CoordinatorDirective, FaultKind, GatewayCommand, GatewayEvent};

mod common;

use common::{BOT_USER, bot_message, ready_event, spawn_shard, test_config, user_message};

const WAIT: Duration = Duration::from_secs(5);

async fn next_command(commands: &mut mpsc::Receiver<GatewayCommand>) -> GatewayCommand {
    timeout(WAIT, commands.recv())
        .await
        .expect("timed out waiting for a gateway command")
        .expect("command channel closed")
}

// ============================================================================
// Startup and Shutdown
// ============================================================================

#[tokio::test]
async fn test_startup_drains_direct_sessions_then_honors_shutdown() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(2)).await.unwrap();
    assert_eq!(
        next_command(&mut shard.commands).await,
        GatewayCommand::CloseDirectSessions
    );

    shard
        .directives
        .send(CoordinatorDirective::ShutdownAll)
        .await
        .unwrap();
    assert_eq!(
        next_command(&mut shard.commands).await,
        GatewayCommand::Disconnect
    );

    drop(shard.events);
    assert!(shard.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_restart_directive_tears_down_cleanly() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(1)).await.unwrap();
    next_command(&mut shard.commands).await; // direct-session drain

    shard
        .directives
        .send(CoordinatorDirective::RestartShard { shard_id: 0 })
        .await
        .unwrap();
    assert_eq!(
        next_command(&mut shard.commands).await,
        GatewayCommand::Disconnect
    );

    drop(shard.events);
    assert!(shard.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_closed_event_stream_ends_the_run() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(1)).await.unwrap();
    next_command(&mut shard.commands).await;

    drop(shard.events);
    assert!(shard.task.await.unwrap().is_ok());
}

// ============================================================================
// Command Round Trips
// ============================================================================

#[tokio::test]
async fn test_ping_round_trip() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(1)).await.unwrap();
    next_command(&mut shard.commands).await;

    shard.events.send(user_message(7, ".ping")).await.unwrap();
    assert_eq!(
        next_command(&mut shard.commands).await,
        GatewayCommand::SendMessage {
            channel_id: 42,
            content: "pong".to_string(),
        }
    );

    drop(shard.events);
    assert!(shard.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_timely_and_economy_against_a_real_store() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(1)).await.unwrap();
    next_command(&mut shard.commands).await;

    shard.events.send(user_message(7, ".timely")).await.unwrap();
    let GatewayCommand::SendMessage { content, .. } = next_command(&mut shard.commands).await
    else {
        panic!("expected a reply");
    };
    assert_eq!(content, "you received 50, your balance is now 50");

    shard.events.send(user_message(7, ".timely")).await.unwrap();
    let GatewayCommand::SendMessage { content, .. } = next_command(&mut shard.commands).await
    else {
        panic!("expected a reply");
    };
    assert!(content.starts_with("already claimed"), "{content}");

    shard.events.send(user_message(7, ".economy")).await.unwrap();
    let GatewayCommand::SendMessage { content, .. } = next_command(&mut shard.commands).await
    else {
        panic!("expected a reply");
    };
    assert_eq!(content, "in circulation: 50 | bot reserve: 0");

    drop(shard.events);
    assert!(shard.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_bot_authors_never_get_replies() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(1)).await.unwrap();
    next_command(&mut shard.commands).await;

    shard
        .events
        .send(bot_message(BOT_USER, ".ping"))
        .await
        .unwrap();
    shard.events.send(user_message(7, ".ping")).await.unwrap();

    // Only the human message earns a reply.
    assert_eq!(
        next_command(&mut shard.commands).await,
        GatewayCommand::SendMessage {
            channel_id: 42,
            content: "pong".to_string(),
        }
    );

    drop(shard.events);
    assert!(shard.task.await.unwrap().is_ok());
    assert!(shard.commands.try_recv().is_err());
}

// ============================================================================
// Fatal Faults
// ============================================================================

#[tokio::test]
async fn test_auth_fault_before_ready_is_fatal() {
    let shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard
        .events
        .send(GatewayEvent::Fault {
            kind: FaultKind::Auth,
            message: "401: invalid token".to_string(),
        })
        .await
        .unwrap();

    let err = shard.task.await.unwrap().unwrap_err();
    assert!(matches!(err, FatalError::Auth));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_transport_fault_after_ready_is_fatal() {
    let mut shard = spawn_shard(test_config());

    shard.events.send(GatewayEvent::Connected).await.unwrap();
    shard.events.send(ready_event(1)).await.unwrap();
    next_command(&mut shard.commands).await;

    shard
        .events
        .send(GatewayEvent::Fault {
            kind: FaultKind::Transport,
            message: "socket reset".to_string(),
        })
        .await
        .unwrap();

    let err = shard.task.await.unwrap().unwrap_err();
    assert!(matches!(err, FatalError::Login));
    assert_eq!(err.exit_code(), 4);
}
