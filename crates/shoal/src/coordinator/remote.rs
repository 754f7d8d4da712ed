//! Proxy to the fleet coordination service.
//!
//! One TCP connection carries both directions as newline-delimited JSON:
//! [`CoordinatorRequest`] lines go out, [`CoordinatorDirective`] lines come
//! back. There is no reconnect. When the link drops, `is_alive` flips and
//! stays false; the service notices the silent shard and has the supervisor
//! restart the whole process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use shoal_protocol::{CoordinatorDirective, CoordinatorRequest, ShardIdentity, ShardState};

use crate::config::CoordinatorSettings;

use super::{Coordinator, CoordinatorError};

pub struct RemoteCoordinator {
    shard: ShardIdentity,
    started_at: DateTime<Utc>,
    writer_tx: mpsc::Sender<CoordinatorRequest>,
    directive_tx: mpsc::Sender<CoordinatorDirective>,
    link_up: Arc<AtomicBool>,
}

impl RemoteCoordinator {
    /// Open the control channel and start its reader/writer tasks. Pushed
    /// directives land on `directive_tx`.
    pub async fn connect(
        settings: &CoordinatorSettings,
        shard: ShardIdentity,
        started_at: DateTime<Utc>,
        directive_tx: mpsc::Sender<CoordinatorDirective>,
    ) -> Result<Self, CoordinatorError> {
        let stream = TcpStream::connect(&settings.url).await?;
        info!(url = %settings.url, %shard, "connected to the coordination service");

        let (read_half, write_half) = stream.into_split();
        let link_up = Arc::new(AtomicBool::new(true));
        let (writer_tx, writer_rx) = mpsc::channel(16);

        tokio::spawn(write_requests(write_half, writer_rx, link_up.clone()));
        tokio::spawn(read_directives(
            read_half,
            directive_tx.clone(),
            shard,
            link_up.clone(),
        ));

        Ok(Self {
            shard,
            started_at,
            writer_tx,
            directive_tx,
            link_up,
        })
    }

    async fn send(&self, request: CoordinatorRequest) -> Result<(), CoordinatorError> {
        self.writer_tx
            .send(request)
            .await
            .map_err(|_| CoordinatorError::LinkDown)
    }
}

#[async_trait]
impl Coordinator for RemoteCoordinator {
    async fn register(&self) -> Result<(), CoordinatorError> {
        self.send(CoordinatorRequest::Register {
            shard: self.shard,
            started_at: self.started_at,
        })
        .await
    }

    async fn report_state(
        &self,
        state: ShardState,
        group_count: u64,
    ) -> Result<(), CoordinatorError> {
        self.send(CoordinatorRequest::Heartbeat {
            shard_id: self.shard.shard_id(),
            state,
            group_count,
        })
        .await
    }

    async fn request_restart(&self) -> Result<(), CoordinatorError> {
        // The service restarts shards by pushing a directive; a restart the
        // shard asks for itself takes the same local path.
        self.directive_tx
            .send(CoordinatorDirective::RestartShard {
                shard_id: self.shard.shard_id(),
            })
            .await
            .map_err(|_| CoordinatorError::LinkDown)
    }

    fn is_alive(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }
}

async fn write_requests(
    mut write_half: OwnedWriteHalf,
    mut writer_rx: mpsc::Receiver<CoordinatorRequest>,
    link_up: Arc<AtomicBool>,
) {
    while let Some(request) = writer_rx.recv().await {
        let mut line = match serde_json::to_vec(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode coordination request: {e}");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = write_half.write_all(&line).await {
            warn!("coordination link write failed: {e}");
            break;
        }
    }
    link_up.store(false, Ordering::SeqCst);
}

async fn read_directives(
    read_half: OwnedReadHalf,
    directive_tx: mpsc::Sender<CoordinatorDirective>,
    shard: ShardIdentity,
    link_up: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let directive: CoordinatorDirective = match serde_json::from_str(&line) {
                    Ok(directive) => directive,
                    Err(e) => {
                        warn!("undecodable coordination directive: {e}");
                        continue;
                    }
                };
                if let CoordinatorDirective::RestartShard { shard_id } = directive
                    && shard_id != shard.shard_id()
                {
                    warn!(shard_id, "restart directive addressed to another shard");
                    continue;
                }
                if directive_tx.send(directive).await.is_err() {
                    // Runtime is gone; nothing left to deliver to.
                    break;
                }
            }
            Ok(None) => {
                info!("coordination service closed the link");
                break;
            }
            Err(e) => {
                warn!("coordination link read failed: {e}");
                break;
            }
        }
    }
    link_up.store(false, Ordering::SeqCst);
}
