//! The shard session actor.
//!
//! One task owns the gateway event stream and is the only writer of the
//! lifecycle state. Everyone else observes through a watch channel
//! ([`ShardSnapshot`]) or a group-event subscription; inbound messages are
//! forwarded to the pipeline's channel without blocking the loop.

// std::sync::Mutex: the subscriber lock is never held across an await.
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shoal_protocol::{
    AccountRef, FaultKind, GatewayCommand, GatewayEvent, GroupInfo, InboundMessage, ReadyData,
    ShardIdentity, ShardState,
};

use super::state::transition_allowed;

const GROUP_EVENT_BUFFER: usize = 32;

/// The two channel halves a gateway connector hands to the runtime.
pub struct GatewayLink {
    /// Connection-state and inbound events, in arrival order.
    pub events: mpsc::Receiver<GatewayEvent>,
    /// Commands back to the connector.
    pub commands: mpsc::Sender<GatewayCommand>,
}

/// Observable state of one shard, published on every change.
#[derive(Debug, Clone)]
pub struct ShardSnapshot {
    pub state: ShardState,
    pub group_count: u64,
    pub current_user: Option<AccountRef>,
    pub fault: Option<FaultKind>,
}

impl ShardSnapshot {
    fn initial() -> Self {
        Self {
            state: ShardState::Created,
            group_count: 0,
            current_user: None,
            fault: None,
        }
    }
}

/// Group membership change, fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    Joined(GroupInfo),
    Left(GroupInfo),
}

/// Why the session task returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The event stream closed, normally after a disconnect request.
    Shutdown,
    /// The gateway reported a terminal fault.
    Faulted(FaultKind),
}

// ============================================================================
// ShardSession
// ============================================================================

pub struct ShardSession {
    identity: ShardIdentity,
    events: mpsc::Receiver<GatewayEvent>,
    commands: mpsc::Sender<GatewayCommand>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    snapshot_tx: watch::Sender<ShardSnapshot>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<GroupEvent>>>>,
    first_ready_seen: bool,
}

impl ShardSession {
    #[must_use]
    pub fn new(
        identity: ShardIdentity,
        link: GatewayLink,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(ShardSnapshot::initial());
        Self {
            identity,
            events: link.events,
            commands: link.commands,
            inbound_tx,
            snapshot_tx,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            first_ready_seen: false,
        }
    }

    /// Start the session task. The handle observes; the task drives.
    pub fn start(self) -> (SessionHandle, JoinHandle<SessionEnd>) {
        let handle = SessionHandle {
            snapshot_rx: self.snapshot_tx.subscribe(),
            subscribers: self.subscribers.clone(),
            commands: self.commands.clone(),
        };
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    async fn run(mut self) -> SessionEnd {
        self.set_state(ShardState::LoggingIn);
        loop {
            match self.events.recv().await {
                None => {
                    debug!(shard = %self.identity, "gateway event stream closed");
                    return SessionEnd::Shutdown;
                }
                Some(event) => {
                    if let Some(end) = self.handle_event(event).await {
                        return end;
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: GatewayEvent) -> Option<SessionEnd> {
        match event {
            GatewayEvent::Connected => self.set_state(ShardState::AwaitingReady),
            GatewayEvent::Ready(data) => self.on_ready(*data).await,
            GatewayEvent::MessageReceived(message) => self.forward_inbound(*message),
            GatewayEvent::GroupJoined(group) => {
                info!(shard = %self.identity, group = group.id, "joined group");
                self.snapshot_tx
                    .send_modify(|snapshot| snapshot.group_count += 1);
                self.fan_out(GroupEvent::Joined(group));
            }
            GatewayEvent::GroupLeft(group) => {
                info!(shard = %self.identity, group = group.id, "left group");
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.group_count = snapshot.group_count.saturating_sub(1);
                });
                self.fan_out(GroupEvent::Left(group));
            }
            GatewayEvent::Disconnected { reason } => {
                warn!(shard = %self.identity, ?reason, "gateway disconnected");
                self.set_state(ShardState::Disconnected);
            }
            GatewayEvent::Fault { kind, message } => {
                error!(shard = %self.identity, ?kind, %message, "gateway fault");
                self.snapshot_tx
                    .send_modify(|snapshot| snapshot.fault = Some(kind));
                self.set_state(ShardState::Faulted);
                return Some(SessionEnd::Faulted(kind));
            }
        }
        None
    }

    async fn on_ready(&mut self, data: ReadyData) {
        info!(
            shard = %self.identity,
            user = %data.current_user.name,
            groups = data.group_count,
            session = ?data.session_id,
            "shard ready"
        );
        // Connectors may deliver ready before the connected notification,
        // both at login and on reconnect; step through AwaitingReady so the
        // machine never skips it.
        let state = self.snapshot_tx.borrow().state;
        if matches!(state, ShardState::LoggingIn | ShardState::Disconnected) {
            self.set_state(ShardState::AwaitingReady);
        }
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.current_user = Some(data.current_user.clone());
            snapshot.group_count = data.group_count;
        });
        self.set_state(ShardState::Ready);

        if !self.first_ready_seen {
            self.first_ready_seen = true;
            // Leftover direct-message sessions from a previous run.
            if let Err(e) = self.commands.send(GatewayCommand::CloseDirectSessions).await {
                debug!(shard = %self.identity, "direct-session drain not delivered: {e}");
            }
        }
    }

    fn set_state(&self, to: ShardState) {
        let from = self.snapshot_tx.borrow().state;
        if from == to {
            return;
        }
        if !transition_allowed(from, to) {
            warn!(shard = %self.identity, %from, %to, "ignoring illegal lifecycle transition");
            return;
        }
        debug!(shard = %self.identity, %from, %to, "lifecycle transition");
        self.snapshot_tx.send_modify(|snapshot| snapshot.state = to);
    }

    fn forward_inbound(&self, message: InboundMessage) {
        match self.inbound_tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    shard = %self.identity,
                    channel = message.channel_id,
                    "event queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Deliver one group event to every subscriber. Each delivery is its own
    /// task so a slow subscriber never blocks the session loop or siblings.
    fn fan_out(&self, event: GroupEvent) {
        let mut subscribers = self.subscribers.lock().expect("mutex poisoned");
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let tx = tx.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Cheap observer handle onto a running session.
#[derive(Clone)]
pub struct SessionHandle {
    snapshot_rx: watch::Receiver<ShardSnapshot>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<GroupEvent>>>>,
    commands: mpsc::Sender<GatewayCommand>,
}

impl SessionHandle {
    /// Current state of the shard.
    #[must_use]
    pub fn snapshot(&self) -> ShardSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch every snapshot change.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<ShardSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Command channel back to the gateway connector.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<GatewayCommand> {
        self.commands.clone()
    }

    /// Receive every group join/leave from now on, exactly once each.
    pub fn subscribe_groups(&self) -> mpsc::Receiver<GroupEvent> {
        let (tx, rx) = mpsc::channel(GROUP_EVENT_BUFFER);
        self.subscribers.lock().expect("mutex poisoned").push(tx);
        rx
    }

    /// Block until the session first reaches Ready, returning the bot's own
    /// account. A fault (or the session ending early) is the error.
    pub async fn wait_ready(&mut self) -> Result<AccountRef, FaultKind> {
        loop {
            {
                let snapshot = self.snapshot_rx.borrow_and_update();
                match snapshot.state {
                    ShardState::Ready => {
                        if let Some(user) = snapshot.current_user.clone() {
                            return Ok(user);
                        }
                    }
                    ShardState::Faulted => {
                        return Err(snapshot.fault.unwrap_or(FaultKind::Transport));
                    }
                    _ => {}
                }
            }
            if self.snapshot_rx.changed().await.is_err() {
                // Session task gone before ready.
                return Err(FaultKind::Transport);
            }
        }
    }
}
