//! Chime: periodic reminder engine.
//!
//! Subcommands:
//! - `daemon`: run the engine (ticker, delivery workers, HTTP trigger)
//! - `tick`: run exactly one tick and print the JSON summary

use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chime_dispatch::{
    DeliveryExecutor, DeliveryQueue, Fanout, LogSender, TickOrchestrator,
};
use chime_store::{MemoryStore, Store};

mod daemon;

#[derive(Parser)]
#[command(name = "chime")]
#[command(about = "Periodic reminder engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine daemon (ticker, delivery workers, HTTP trigger)
    Daemon {
        /// Seconds between orchestrator ticks
        #[arg(long, env = "CHIME_TICK_INTERVAL", default_value = "60")]
        tick_interval: u64,

        /// Number of delivery workers
        #[arg(long, env = "CHIME_WORKERS", default_value = "3")]
        workers: usize,

        /// Delivery queue capacity
        #[arg(long, env = "CHIME_QUEUE_SIZE", default_value = "64")]
        queue_size: usize,

        /// HTTP port for the trigger surface
        #[arg(long, env = "CHIME_PORT", default_value = "8080")]
        port: u16,

        /// Seed demo data (a test-override preference) on startup
        #[arg(long)]
        seed: bool,
    },

    /// Run a single tick and print the JSON summary
    Tick {
        /// Seed demo data first, so the tick has something to dispatch
        #[arg(long)]
        seed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chime=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            tick_interval,
            workers,
            queue_size,
            port,
            seed,
        } => {
            daemon::run(daemon::DaemonConfig {
                tick_interval,
                workers,
                queue_size,
                port,
                seed,
            })
            .await
        }

        Commands::Tick { seed } => run_single_tick(seed).await,
    }
}

/// The cron-style entry point: one tick, outcomes drained inline, summary
/// on stdout.
async fn run_single_tick(seed: bool) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    if seed {
        daemon::seed_demo(store.as_ref())
            .await
            .map_err(|e| miette::miette!("failed to seed demo data: {}", e))?;
    }

    let (queue, mut work_rx) = DeliveryQueue::bounded(64);
    let orchestrator = TickOrchestrator::new(Arc::clone(&store), queue);
    let outcome = orchestrator
        .run_tick()
        .await
        .map_err(|e| miette::miette!("tick failed: {}", e))?;

    // Drain whatever the tick enqueued so the run is self-contained.
    let fanout = Fanout::new(Arc::new(LogSender), Arc::clone(&store));
    let executor = DeliveryExecutor::new(Arc::clone(&store), fanout);
    while let Ok(task) = work_rx.try_recv() {
        if let Err(e) = executor.execute(&task).await {
            tracing::error!(user_id = %task.user_id, error = %e, "delivery task errored");
        }
    }

    let json = serde_json::to_string_pretty(&outcome)
        .map_err(|e| miette::miette!("failed to encode summary: {}", e))?;
    println!("{}", json);
    Ok(())
}
