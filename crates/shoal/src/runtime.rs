//! Shard runtime: startup ordering, service composition, and supervision
//! around one gateway session.
//!
//! Startup is strictly ordered. Login and readiness complete before any
//! service is composed, services are composed before the pipeline exists,
//! and the pipeline exists before the first event is pumped. A fatal login
//! aborts with its exit code and no partial service graph keeps running.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shoal_protocol::{
    AccountRef, CoordinatorDirective, FaultKind, GatewayCommand, InboundMessage, ShardIdentity,
};

use crate::cache::{AggregateCache, CacheStore, CooldownLedger, MemoryStore};
use crate::clock::Clock;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::dispatch::BuiltinCommands;
use crate::economy::{BalanceStore, DecayScheduler, EconomyService, SqliteBalanceStore};
use crate::pipeline::{
    Blocklist, CommandThrottle, IgnoreBots, MentionPrefix, Pipeline, PipelineBuilder, UsageLog,
};
use crate::session::{GatewayLink, SessionEnd, SessionHandle, ShardSession, ShardSnapshot};

const INBOUND_BUFFER: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// Exit codes supervisors key on. Stable contract.
pub const EXIT_AUTH_FAILURE: u8 = 3;
pub const EXIT_LOGIN_FAILURE: u8 = 4;
pub const EXIT_COMPOSE_FAILURE: u8 = 9;

/// A failure class that ends the process with its own exit code.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("the platform rejected the credentials")]
    Auth,
    #[error("gateway login failed")]
    Login,
    #[error("service composition failed: {0:#}")]
    Compose(anyhow::Error),
}

impl FatalError {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            FatalError::Auth => EXIT_AUTH_FAILURE,
            FatalError::Login => EXIT_LOGIN_FAILURE,
            FatalError::Compose(_) => EXIT_COMPOSE_FAILURE,
        }
    }
}

/// Everything one shard needs to run, assembled by the command layer
/// (or by a test with fake channel halves).
pub struct ShardRuntime {
    pub config: Config,
    /// Resolved balance database path.
    pub db_path: PathBuf,
    pub identity: ShardIdentity,
    pub link: GatewayLink,
    pub coordinator: Arc<dyn Coordinator>,
    /// Directives pushed by the coordinator, or by its local restart path.
    pub directives: mpsc::Receiver<CoordinatorDirective>,
    pub clock: Arc<dyn Clock>,
}

impl ShardRuntime {
    /// Drive the shard to completion. Returns when the gateway session ends,
    /// a directive or ctrl-c asks for teardown, or a fatal fault occurs.
    pub async fn run(self) -> Result<(), FatalError> {
        let ShardRuntime {
            config,
            db_path,
            identity,
            link,
            coordinator,
            mut directives,
            clock,
        } = self;

        info!(
            shard_id = identity.shard_id(),
            total_shards = identity.total_shards(),
            "starting shard"
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let session = ShardSession::new(identity, link, inbound_tx);
        let (mut handle, mut session_task) = session.start();

        let user = match handle.wait_ready().await {
            Ok(user) => user,
            Err(FaultKind::Auth) => return Err(FatalError::Auth),
            Err(FaultKind::Transport) => return Err(FatalError::Login),
        };
        info!(user = %user.name, user_id = user.id, "gateway session ready");

        if let Err(error) = coordinator.register().await {
            let error = anyhow::Error::new(error).context("coordinator registration");
            close_session(&handle, &mut session_task).await;
            return Err(FatalError::Compose(error));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let composed = match compose(
            &config,
            &db_path,
            identity,
            &user,
            handle.commands(),
            clock,
            shutdown_rx.clone(),
        )
        .await
        {
            Ok(composed) => composed,
            Err(error) => {
                close_session(&handle, &mut session_task).await;
                return Err(FatalError::Compose(error));
            }
        };

        let pump_task = spawn_event_pump(composed.pipeline.clone(), inbound_rx);
        let heartbeat_period = Duration::from_secs(config.coordinator.heartbeat_seconds.max(1));
        let heartbeat_task = spawn_heartbeats(
            coordinator,
            handle.snapshots(),
            heartbeat_period,
            shutdown_rx,
        );

        info!("shard running");
        let session_end = tokio::select! {
            directive = next_directive(&mut directives) => {
                match directive {
                    CoordinatorDirective::RestartShard { shard_id } => {
                        info!(shard_id, "restart directive received");
                    }
                    CoordinatorDirective::ShutdownAll => {
                        info!("fleet shutdown directive received");
                    }
                }
                None
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(error = %error, "ctrl-c handler failed");
                } else {
                    info!("ctrl-c received, shutting down");
                }
                None
            }
            end = &mut session_task => Some(end),
        };

        let _ = shutdown_tx.send(true);
        let session_end = match session_end {
            Some(end) => Some(end),
            None => {
                // Directed or signalled teardown: ask the connector to
                // disconnect, then give the session a grace period.
                let _ = handle.commands().send(GatewayCommand::Disconnect).await;
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut session_task).await {
                    Ok(end) => Some(end),
                    Err(_) => {
                        warn!("session did not close within the grace period, aborting");
                        session_task.abort();
                        None
                    }
                }
            }
        };

        if let Some(task) = composed.decay_task {
            let _ = task.await;
        }
        let _ = heartbeat_task.await;
        let _ = pump_task.await;
        info!(handled = composed.usage.handled_count(), "shard stopped");

        match session_end {
            Some(Ok(SessionEnd::Faulted(FaultKind::Auth))) => Err(FatalError::Auth),
            Some(Ok(SessionEnd::Faulted(FaultKind::Transport))) => Err(FatalError::Login),
            Some(Ok(SessionEnd::Shutdown)) | None => Ok(()),
            Some(Err(error)) => {
                error!(error = %error, "session task failed");
                Err(FatalError::Login)
            }
        }
    }
}

struct Composed {
    pipeline: Arc<Pipeline>,
    usage: UsageLog,
    decay_task: Option<JoinHandle<()>>,
}

/// Build the service graph. Only called once the session is ready, so the
/// bot account is known.
async fn compose(
    config: &Config,
    db_path: &Path,
    identity: ShardIdentity,
    user: &AccountRef,
    commands: mpsc::Sender<GatewayCommand>,
    clock: Arc<dyn Clock>,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<Composed> {
    let store = Arc::new(
        SqliteBalanceStore::open(db_path)
            .await
            .with_context(|| format!("open balance database at {}", db_path.display()))?,
    );

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(clock.clone()));
    let ledger = CooldownLedger::new(cache.clone(), &config.cache.namespace);
    let aggregates = AggregateCache::new(cache, &config.cache.namespace);
    let economy = EconomyService::new(
        store.clone(),
        ledger.clone(),
        aggregates.clone(),
        user.id,
        config.economy.timely,
    );

    // Shard 0 owns the bot account row and the decay job.
    let decay_task = if identity.is_primary() {
        store
            .ensure_account(user.id, &user.name)
            .await
            .context("ensure bot account")?;
        let scheduler = DecayScheduler::new(store, aggregates, clock, config.economy.decay, user.id);
        scheduler
            .seed_checkpoint()
            .await
            .context("seed decay checkpoint")?;
        let task = scheduler.spawn(shutdown_rx);
        info!("decay scheduler started");
        Some(task)
    } else {
        None
    };

    let settings = &config.pipeline;
    let prefix = settings.prefix.as_str();
    let cooldown = Duration::from_secs(settings.command_cooldown_seconds);
    let usage = UsageLog::new();
    let pipeline = PipelineBuilder::new()
        .early(IgnoreBots)
        .early(Blocklist::new(
            settings.blocked_groups.iter().copied(),
            settings.blocked_users.iter().copied(),
        ))
        .transformer(MentionPrefix::new(user.id, prefix))
        .blocker(CommandThrottle::new(ledger, prefix, cooldown))
        .executor(usage.clone())
        .build(BuiltinCommands::new(commands, economy, prefix));

    Ok(Composed {
        pipeline: Arc::new(pipeline),
        usage,
        decay_task,
    })
}

/// Each inbound event becomes its own task; stages within one event still
/// run sequentially inside [`Pipeline::process`].
fn spawn_event_pump(
    pipeline: Arc<Pipeline>,
    mut inbound: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let outcome = pipeline.process(message).await;
                debug!(?outcome, "event processed");
            });
        }
    })
}

/// Report state on every transition and on every tick, whichever comes
/// first. Report failures are warnings; the link owner decides liveness.
fn spawn_heartbeats(
    coordinator: Arc<dyn Coordinator>,
    mut snapshots: watch::Receiver<ShardSnapshot>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // skip immediate tick
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    report(coordinator.as_ref(), &snapshots).await;
                }
                _ = ticker.tick() => {
                    report(coordinator.as_ref(), &snapshots).await;
                }
            }
        }
    })
}

async fn report(coordinator: &dyn Coordinator, snapshots: &watch::Receiver<ShardSnapshot>) {
    let (state, group_count) = {
        let snapshot = snapshots.borrow();
        (snapshot.state, snapshot.group_count)
    };
    if let Err(error) = coordinator.report_state(state, group_count).await {
        warn!(error = %error, "state report failed");
    }
}

/// A closed directive channel means no authority will ever direct us, not
/// that we should shut down.
async fn next_directive(
    directives: &mut mpsc::Receiver<CoordinatorDirective>,
) -> CoordinatorDirective {
    match directives.recv().await {
        Some(directive) => directive,
        None => std::future::pending().await,
    }
}

async fn close_session(handle: &SessionHandle, session_task: &mut JoinHandle<SessionEnd>) {
    let _ = handle.commands().send(GatewayCommand::Disconnect).await;
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut *session_task)
        .await
        .is_err()
    {
        session_task.abort();
    }
}
