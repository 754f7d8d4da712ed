//! SQLite-backed balance store.
//!
//! rusqlite connections are not `Sync`, so a dedicated blocking worker owns
//! the connection and serves requests over a command channel. Statements
//! stay on the worker thread; callers only see the async trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::store::{
    BalanceResult, BalanceStore, BalanceStoreError, DECAY_CHECKPOINT, DecayRequest,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    account_id INTEGER PRIMARY KEY,
    name       TEXT NOT NULL DEFAULT '',
    balance    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_accounts_balance ON accounts(balance);
CREATE TABLE IF NOT EXISTS job_checkpoints (
    name        TEXT PRIMARY KEY,
    last_run_at TEXT NOT NULL
);
";

enum StoreCommand {
    EnsureAccount {
        account_id: u64,
        name: String,
        reply: oneshot::Sender<rusqlite::Result<()>>,
    },
    Deposit {
        account_id: u64,
        name: String,
        amount: i64,
        reply: oneshot::Sender<rusqlite::Result<i64>>,
    },
    BalanceOf {
        account_id: u64,
        reply: oneshot::Sender<rusqlite::Result<i64>>,
    },
    TotalExcluding {
        account_id: u64,
        reply: oneshot::Sender<rusqlite::Result<i64>>,
    },
    ApplyDecay {
        request: DecayRequest,
        reply: oneshot::Sender<rusqlite::Result<u64>>,
    },
    Checkpoint {
        name: String,
        reply: oneshot::Sender<rusqlite::Result<Option<DateTime<Utc>>>>,
    },
}

/// Handle to the store worker. Cheap to clone.
#[derive(Clone)]
pub struct SqliteBalanceStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl SqliteBalanceStore {
    /// Open (or create) the database, apply the schema, and start the
    /// worker. Safe to call from every shard: the schema is idempotent.
    pub async fn open(db_path: impl AsRef<Path>) -> BalanceResult<Self> {
        let path: PathBuf = db_path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .map_err(|_| BalanceStoreError::Closed)??;

        let (tx, rx) = mpsc::channel(64);
        tokio::task::spawn_blocking(move || run_worker(conn, rx));
        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<rusqlite::Result<T>>) -> StoreCommand,
    ) -> BalanceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| BalanceStoreError::Closed)?;
        let result = reply_rx.await.map_err(|_| BalanceStoreError::Closed)?;
        Ok(result?)
    }
}

impl std::fmt::Debug for SqliteBalanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBalanceStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl BalanceStore for SqliteBalanceStore {
    async fn ensure_account(&self, account_id: u64, name: &str) -> BalanceResult<()> {
        let name = name.to_string();
        self.request(|reply| StoreCommand::EnsureAccount {
            account_id,
            name,
            reply,
        })
        .await
    }

    async fn deposit(&self, account_id: u64, name: &str, amount: i64) -> BalanceResult<i64> {
        let name = name.to_string();
        self.request(|reply| StoreCommand::Deposit {
            account_id,
            name,
            amount,
            reply,
        })
        .await
    }

    async fn balance_of(&self, account_id: u64) -> BalanceResult<i64> {
        self.request(|reply| StoreCommand::BalanceOf { account_id, reply })
            .await
    }

    async fn total_balance_excluding(&self, account_id: u64) -> BalanceResult<i64> {
        self.request(|reply| StoreCommand::TotalExcluding { account_id, reply })
            .await
    }

    async fn apply_decay(&self, request: DecayRequest) -> BalanceResult<u64> {
        self.request(|reply| StoreCommand::ApplyDecay { request, reply })
            .await
    }

    async fn checkpoint(&self, name: &str) -> BalanceResult<Option<DateTime<Utc>>> {
        let name = name.to_string();
        self.request(|reply| StoreCommand::Checkpoint { name, reply })
            .await
    }
}

// ============================================================================
// Worker
// ============================================================================

fn open_connection(path: &Path) -> BalanceResult<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn run_worker(mut conn: Connection, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            StoreCommand::EnsureAccount {
                account_id,
                name,
                reply,
            } => {
                let _ = reply.send(ensure_account(&conn, account_id, &name));
            }
            StoreCommand::Deposit {
                account_id,
                name,
                amount,
                reply,
            } => {
                let _ = reply.send(deposit(&conn, account_id, &name, amount));
            }
            StoreCommand::BalanceOf { account_id, reply } => {
                let _ = reply.send(balance_of(&conn, account_id));
            }
            StoreCommand::TotalExcluding { account_id, reply } => {
                let _ = reply.send(total_excluding(&conn, account_id));
            }
            StoreCommand::ApplyDecay { request, reply } => {
                let _ = reply.send(apply_decay(&mut conn, &request));
            }
            StoreCommand::Checkpoint { name, reply } => {
                let _ = reply.send(checkpoint(&conn, &name));
            }
        }
    }
    debug!("balance store worker stopped");
}

fn ensure_account(conn: &Connection, account_id: u64, name: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO accounts (account_id, name) VALUES (?1, ?2)
         ON CONFLICT(account_id) DO UPDATE SET name = excluded.name",
        params![account_id as i64, name],
    )?;
    Ok(())
}

fn deposit(conn: &Connection, account_id: u64, name: &str, amount: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO accounts (account_id, name, balance) VALUES (?1, ?2, ?3)
         ON CONFLICT(account_id) DO UPDATE
         SET balance = balance + excluded.balance, name = excluded.name
         RETURNING balance",
        params![account_id as i64, name, amount],
        |row| row.get(0),
    )
}

fn balance_of(conn: &Connection, account_id: u64) -> rusqlite::Result<i64> {
    let balance = conn
        .query_row(
            "SELECT balance FROM accounts WHERE account_id = ?1",
            params![account_id as i64],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

fn total_excluding(conn: &Connection, account_id: u64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(balance), 0) FROM accounts WHERE account_id != ?1",
        params![account_id as i64],
        |row| row.get(0),
    )
}

/// The whole decay is one UPDATE: each eligible balance loses
/// `round(balance * percent - 0.5)` (floor for positive values), clamped to
/// the cap. The durable checkpoint advances in the same transaction, so a
/// crash can never record a decay that did not run.
fn apply_decay(conn: &mut Connection, request: &DecayRequest) -> rusqlite::Result<u64> {
    let cap = if request.max_amount == 0 {
        i64::MAX
    } else {
        request.max_amount
    };
    let tx = conn.transaction()?;
    let affected = tx.execute(
        "UPDATE accounts
         SET balance = balance - CASE
                 WHEN ?1 < CAST(ROUND(balance * ?2 - 0.5) AS INTEGER) THEN ?1
                 ELSE CAST(ROUND(balance * ?2 - 0.5) AS INTEGER)
             END
         WHERE balance > ?3 AND account_id != ?4",
        params![
            cap,
            request.percent,
            request.min_threshold,
            request.excluded_account as i64
        ],
    )?;
    tx.execute(
        "INSERT OR REPLACE INTO job_checkpoints (name, last_run_at) VALUES (?1, ?2)",
        params![DECAY_CHECKPOINT, request.applied_at],
    )?;
    tx.commit()?;
    Ok(affected as u64)
}

fn checkpoint(conn: &Connection, name: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    conn.query_row(
        "SELECT last_run_at FROM job_checkpoints WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}
