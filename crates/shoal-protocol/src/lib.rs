//! Contract types shared between the shoal runtime, its gateway connector,
//! and the fleet coordination service.
//!
//! Two independent wire contracts live here:
//!
//! - **Gateway link** (connector ↔ runtime): connection-state events and
//!   inbound messages flow one way, commands flow the other. The connector
//!   and the runtime exchange these over in-process channels.
//! - **Coordination link** (shard → coordination service): JSON Lines
//!   (newline-delimited JSON) over a TCP control connection. Shards send
//!   [`CoordinatorRequest`], the service pushes [`CoordinatorDirective`].
//!
//! Both contracts use `type`-tagged, snake_case JSON so either side can be
//! reimplemented in another language without touching this crate's callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Shard Identity & State
// ============================================================================

/// Which partition of the fleet this process owns.
///
/// Invariant: `shard_id < total_shards`. Enforced at construction and on
/// deserialization, so a value of this type is always addressable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawShardIdentity")]
pub struct ShardIdentity {
    shard_id: u32,
    total_shards: u32,
}

#[derive(Deserialize)]
struct RawShardIdentity {
    shard_id: u32,
    total_shards: u32,
}

/// Rejected shard coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("shard id {shard_id} is out of range for a fleet of {total_shards}")]
pub struct ShardIdentityError {
    pub shard_id: u32,
    pub total_shards: u32,
}

impl ShardIdentity {
    pub fn new(shard_id: u32, total_shards: u32) -> Result<Self, ShardIdentityError> {
        if shard_id >= total_shards {
            return Err(ShardIdentityError {
                shard_id,
                total_shards,
            });
        }
        Ok(Self {
            shard_id,
            total_shards,
        })
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn total_shards(&self) -> u32 {
        self.total_shards
    }

    /// Shard 0 owns fleet-wide singleton duties (schema setup, decay).
    pub fn is_primary(&self) -> bool {
        self.shard_id == 0
    }
}

impl TryFrom<RawShardIdentity> for ShardIdentity {
    type Error = ShardIdentityError;

    fn try_from(raw: RawShardIdentity) -> Result<Self, Self::Error> {
        Self::new(raw.shard_id, raw.total_shards)
    }
}

impl std::fmt::Display for ShardIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.shard_id, self.total_shards)
    }
}

/// Lifecycle of one shard's gateway session.
///
/// Owned by the shard session task; serialized in heartbeats so the
/// coordination service sees the same states the process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    Created,
    LoggingIn,
    AwaitingReady,
    Ready,
    Disconnected,
    Faulted,
}

impl ShardState {
    /// Faulted is terminal: the process exits rather than recovering.
    pub fn is_terminal(self) -> bool {
        matches!(self, ShardState::Faulted)
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShardState::Created => "created",
            ShardState::LoggingIn => "logging_in",
            ShardState::AwaitingReady => "awaiting_ready",
            ShardState::Ready => "ready",
            ShardState::Disconnected => "disconnected",
            ShardState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Gateway Events (connector → runtime)
// ============================================================================

/// Events sent from a gateway connector to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Authenticated and the socket is up; readiness not yet confirmed.
    Connected,

    /// The platform confirmed the session is fully established.
    Ready(Box<ReadyData>),

    /// Incoming message from a user.
    MessageReceived(Box<InboundMessage>),

    /// This shard was added to a group.
    GroupJoined(GroupInfo),

    /// This shard was removed from a group.
    GroupLeft(GroupInfo),

    /// Connection lost; the connector keeps retrying on its own.
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Unrecoverable failure. The connector closes the link after this.
    Fault { kind: FaultKind, message: String },
}

/// Failure class for [`GatewayEvent::Fault`]. Drives the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Credentials rejected by the platform.
    Auth,
    /// Anything else the connector could not recover from.
    Transport,
}

/// Data for a [`GatewayEvent::Ready`] event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyData {
    /// The account this shard is logged in as.
    pub current_user: AccountRef,
    /// Number of groups visible to this shard at readiness.
    pub group_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Minimal account reference used in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: u64,
    pub name: String,
}

/// A group (server) this shard is a member of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
}

/// Data for an incoming message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: u64,
    pub channel_id: u64,
    /// Absent for direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    pub author: AccountRef,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    /// Timestamp from the platform, when it provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Whether this arrived outside any group (a direct message).
    pub fn is_direct(&self) -> bool {
        self.group_id.is_none()
    }
}

// ============================================================================
// Gateway Commands (runtime → connector)
// ============================================================================

/// Commands sent from the runtime to its gateway connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Send a text message to a channel.
    SendMessage { channel_id: u64, content: String },

    /// Best-effort close of any direct-message sessions left over from a
    /// previous run. Issued once after the first ready.
    CloseDirectSessions,

    /// Disconnect and stop delivering events. Used for graceful shutdown.
    Disconnect,
}

// ============================================================================
// Coordination Wire (shard ↔ coordination service)
// ============================================================================

/// Requests a shard sends to the coordination service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorRequest {
    /// Announce this shard on attach.
    Register {
        shard: ShardIdentity,
        started_at: DateTime<Utc>,
    },

    /// Periodic liveness report, also sent on every state transition.
    Heartbeat {
        shard_id: u32,
        state: ShardState,
        #[serde(default)]
        group_count: u64,
    },
}

/// Directives the coordination service pushes to a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorDirective {
    /// Tear down and exit so the supervisor can restart this shard.
    RestartShard { shard_id: u32 },

    /// Entire fleet is being brought down.
    ShutdownAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_out_of_range() {
        assert!(ShardIdentity::new(0, 1).is_ok());
        assert!(ShardIdentity::new(15, 16).is_ok());
        assert!(ShardIdentity::new(1, 1).is_err());
        assert!(ShardIdentity::new(0, 0).is_err());

        let err = serde_json::from_str::<ShardIdentity>(r#"{"shard_id":4,"total_shards":2}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_command_serialization() {
        let cmd = GatewayCommand::SendMessage {
            channel_id: 42,
            content: "pong".to_string(),
        };

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""type":"send_message""#));

        let parsed: GatewayCommand = serde_json::from_str(&json).unwrap();
        match parsed {
            GatewayCommand::SendMessage { content, .. } => {
                assert_eq!(content, "pong");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = GatewayEvent::Ready(Box::new(ReadyData {
            current_user: AccountRef {
                id: 7,
                name: "shoal".to_string(),
            },
            group_count: 120,
            session_id: Some("abc".to_string()),
        }));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"ready""#));

        let parsed: GatewayEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            GatewayEvent::Ready(data) => {
                assert_eq!(data.group_count, 120);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_coordination_round_trip() {
        let shard = ShardIdentity::new(3, 16).unwrap();
        let req = CoordinatorRequest::Register {
            shard,
            started_at: Utc::now(),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"register""#));
        assert!(json.contains(r#""shard_id":3"#));

        let directive: CoordinatorDirective =
            serde_json::from_str(r#"{"type":"restart_shard","shard_id":3}"#).unwrap();
        match directive {
            CoordinatorDirective::RestartShard { shard_id } => assert_eq!(shard_id, 3),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_heartbeat_state_names() {
        let hb = CoordinatorRequest::Heartbeat {
            shard_id: 0,
            state: ShardState::AwaitingReady,
            group_count: 0,
        };
        let json = serde_json::to_string(&hb).unwrap();
        assert!(json.contains(r#""state":"awaiting_ready""#));
    }

    #[test]
    fn test_direct_message_detection() {
        let msg = InboundMessage {
            message_id: 1,
            channel_id: 2,
            group_id: None,
            author: AccountRef {
                id: 3,
                name: "someone".to_string(),
            },
            author_is_bot: false,
            content: "hi".to_string(),
            timestamp: None,
        };
        assert!(msg.is_direct());
    }
}
