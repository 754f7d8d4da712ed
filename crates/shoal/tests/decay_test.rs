//! Decay survives process restarts: balances and the gate checkpoint live
//! in the database file, and a fresh cache reseeds from the durable row.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;

use shoal::cache::{AggregateCache, MemoryStore};
use shoal::clock::ManualClock;
use shoal::config::DecaySettings;
use shoal::economy::{BalanceStore, DecayScheduler, SqliteBalanceStore, TickOutcome};

const BOT: u64 = 900;

fn settings() -> DecaySettings {
    DecaySettings {
        percent: 0.10,
        max_amount: 0,
        min_threshold: 9,
        interval_hours: 24,
        tick_seconds: 1,
    }
}

fn scheduler(store: Arc<SqliteBalanceStore>, clock: &ManualClock) -> DecayScheduler {
    let memory = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
    DecayScheduler::new(
        store,
        AggregateCache::new(memory, "shoal"),
        Arc::new(clock.clone()),
        settings(),
        BOT,
    )
}

#[tokio::test]
async fn test_decay_and_checkpoint_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("economy.db");
    let clock = ManualClock::at(Utc::now());

    {
        let store = Arc::new(SqliteBalanceStore::open(&path).await.unwrap());
        store.deposit(BOT, "shoal", 500).await.unwrap();
        store.deposit(1, "ada", 100).await.unwrap();
        store.deposit(2, "grace", 5).await.unwrap();

        let scheduler = scheduler(store.clone(), &clock);
        scheduler.seed_checkpoint().await.unwrap();
        assert_eq!(
            scheduler.run_once().await,
            TickOutcome::Applied { affected: 1 }
        );
        assert_eq!(store.balance_of(1).await.unwrap(), 90);
        assert_eq!(store.balance_of(2).await.unwrap(), 5);
        assert_eq!(store.balance_of(BOT).await.unwrap(), 500);
    }

    // A new process seeds its gate from the durable checkpoint, so the cut
    // is not applied twice.
    let store = Arc::new(SqliteBalanceStore::open(&path).await.unwrap());
    assert_eq!(store.balance_of(1).await.unwrap(), 90);

    let scheduler = scheduler(store.clone(), &clock);
    scheduler.seed_checkpoint().await.unwrap();
    assert_eq!(scheduler.run_once().await, TickOutcome::NotDue);

    clock.advance(TimeDelta::hours(25));
    assert_eq!(
        scheduler.run_once().await,
        TickOutcome::Applied { affected: 1 }
    );
    assert_eq!(store.balance_of(1).await.unwrap(), 81);
}

#[tokio::test]
async fn test_scheduler_loop_applies_on_its_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("economy.db");
    let clock = ManualClock::at(Utc::now());

    let store = Arc::new(SqliteBalanceStore::open(&path).await.unwrap());
    store.deposit(1, "ada", 100).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = scheduler(store.clone(), &clock).spawn(shutdown_rx);

    let mut decayed = false;
    for _ in 0..40 {
        if store.balance_of(1).await.unwrap() == 90 {
            decayed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(decayed, "scheduler never applied the decay");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
