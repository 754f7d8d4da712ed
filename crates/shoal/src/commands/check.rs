//! `shoal check`: validate the configuration and report what would run.

use std::path::Path;

use anyhow::{Result, bail};

use shoal::config::{self, Config};
use shoal::coordinator::COORDINATED_ENV;
use shoal_protocol::ShardIdentity;

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path).await?;
    let identity = ShardIdentity::new(config.shard.id, config.shard.total)?;

    println!("config: {config_path}");
    println!(
        "shard: {} of {}",
        identity.shard_id(),
        identity.total_shards()
    );

    let config_path_ref = Path::new(config_path);
    let db_path = config
        .economy
        .db_path
        .as_ref()
        .map(|p| config::resolve_path(config_path_ref, p))
        .unwrap_or_else(|| {
            config::resolve_path(config_path_ref, Path::new(config::DEFAULT_DB_PATH))
        });
    println!("balance database: {}", db_path.display());

    match std::env::var(COORDINATED_ENV).ok().filter(|v| !v.is_empty()) {
        Some(_) => println!("coordinator: remote at {}", config.coordinator.url),
        None => println!("coordinator: standalone"),
    }

    let decay = config.economy.decay;
    if decay.percent > 0.0 && decay.percent <= 1.0 && decay.max_amount >= 0 {
        println!(
            "decay: {:.1}% every {}h on balances above {} (cap {})",
            decay.percent * 100.0,
            decay.interval_hours,
            decay.min_threshold,
            decay.max_amount
        );
    } else {
        println!("decay: disabled");
    }

    let timely = config.economy.timely;
    if timely.amount > 0 && timely.period_hours > 0 {
        println!("timely: {} every {}h", timely.amount, timely.period_hours);
    } else {
        println!("timely: disabled");
    }

    let token_set = config
        .gateway
        .discord
        .as_ref()
        .is_some_and(|discord| !discord.token.is_empty());
    if !token_set {
        bail!("gateway.discord.token is not set in {config_path}");
    }
    println!("gateway: discord");

    println!("configuration ok");
    Ok(())
}
