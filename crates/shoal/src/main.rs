mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use shoal::runtime::FatalError;

// ============================================================================
// CLI Types
// ============================================================================

/// Shoal - a multi-shard bot runtime
#[derive(Parser, Debug)]
#[command(version = shoal::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one shard until shutdown or a fatal fault
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "shoal.yaml")]
        config: String,

        /// Shard id (overrides config file)
        #[arg(long)]
        shard_id: Option<u32>,

        /// Total shard count (overrides config file)
        #[arg(long)]
        total_shards: Option<u32>,
    },

    /// Validate the configuration and report what would run
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "shoal.yaml")]
        config: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            // Fatal shard failures carry exit codes supervisors key on.
            match e.downcast_ref::<FatalError>() {
                Some(fatal) => std::process::ExitCode::from(fatal.exit_code()),
                None => std::process::ExitCode::FAILURE,
            }
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            shard_id,
            total_shards,
        } => commands::run::run(&config, shard_id, total_shards).await,
        Commands::Check { config } => commands::check::run(&config).await,
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
