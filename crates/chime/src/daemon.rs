//! Daemon wiring: interval ticker, delivery worker pool, HTTP trigger.
//!
//! The ticker drives the orchestrator on a fixed cadence; workers drain
//! the delivery queue concurrently. Both shut down through a shared watch
//! channel on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use miette::Result;
use tokio::sync::{Mutex, watch};
use tracing::{error, info};

use chime_dispatch::{
    DeliveryExecutor, DeliveryQueue, DeliveryTask, Fanout, LogSender, TickOrchestrator,
};
use chime_store::{
    MemoryStore, NotificationPreference, PushSubscription, Store, StoreError, UserAccount,
};
use chime_web::create_router;

/// Configuration for the daemon.
pub struct DaemonConfig {
    /// Seconds between orchestrator ticks.
    pub tick_interval: u64,
    /// Number of delivery workers.
    pub workers: usize,
    /// Delivery queue capacity.
    pub queue_size: usize,
    /// Port for the HTTP trigger surface.
    pub port: u16,
    /// Seed demo data on startup.
    pub seed: bool,
}

/// Run the daemon.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!(
        tick_interval = config.tick_interval,
        workers = config.workers,
        queue_size = config.queue_size,
        port = config.port,
        "starting chime daemon"
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    if config.seed {
        seed_demo(store.as_ref())
            .await
            .map_err(|e| miette::miette!("failed to seed demo data: {}", e))?;
    }

    let (queue, work_rx) = DeliveryQueue::bounded(config.queue_size);
    let orchestrator = Arc::new(TickOrchestrator::new(Arc::clone(&store), queue));
    let fanout = Fanout::new(Arc::new(LogSender), Arc::clone(&store));
    let executor = Arc::new(DeliveryExecutor::new(Arc::clone(&store), fanout));

    // Shutdown channel, flipped by ctrl-c.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // Worker pool draining the delivery queue.
    let work_rx = Arc::new(Mutex::new(work_rx));
    let mut worker_handles = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let work_rx = Arc::clone(&work_rx);
        let executor = Arc::clone(&executor);
        let mut shutdown_rx = shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            info!(worker_id, "delivery worker started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let task: Option<DeliveryTask> = {
                    let mut rx = work_rx.lock().await;
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                            continue;
                        }
                        task = rx.recv() => task,
                    }
                };

                let Some(task) = task else {
                    // Channel closed.
                    break;
                };

                match executor.execute(&task).await {
                    Ok(outcome) => {
                        info!(
                            worker_id,
                            user_id = %task.user_id,
                            bucket_key = %task.bucket_key,
                            outcome = ?outcome,
                            "delivery task finished"
                        );
                    }
                    Err(e) => {
                        error!(
                            worker_id,
                            user_id = %task.user_id,
                            bucket_key = %task.bucket_key,
                            error = %e,
                            "delivery task errored"
                        );
                    }
                }
            }

            info!(worker_id, "delivery worker stopped");
        });

        worker_handles.push(handle);
    }

    // Ticker: the fixed external cadence. Missed or overlapping ticks are
    // skipped by the orchestrator's lease, never queued.
    let ticker_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let mut shutdown_rx = shutdown_rx.clone();
        let interval = Duration::from_secs(config.tick_interval);

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "ticker started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.run_tick().await {
                            error!(error = %e, "tick failed");
                        }
                    }
                }
            }

            info!("ticker stopped");
        })
    };

    // HTTP trigger surface.
    let router = create_router(Arc::clone(&orchestrator), Arc::clone(&store));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|e| miette::miette!("failed to bind port {}: {}", config.port, e))?;
    info!(port = config.port, "trigger surface listening");

    let mut serve_shutdown_rx = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            loop {
                if serve_shutdown_rx.changed().await.is_err() || *serve_shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| miette::miette!("server error: {}", e))?;

    info!("shutting down daemon tasks");
    let _ = ticker_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("daemon shut down gracefully");
    Ok(())
}

/// Create a demo user, subscription, and test-override preference.
///
/// The override makes the preference due within seconds, so one daemon
/// tick (or `chime tick --seed`) exercises the whole pipeline.
pub async fn seed_demo(store: &dyn Store) -> Result<(), StoreError> {
    let user_id = "demo";
    store.put_user(UserAccount::new(user_id)).await?;
    store
        .put_subscription(PushSubscription {
            user_id: user_id.to_string(),
            endpoint: "https://push.example/demo".to_string(),
            p256dh: "demo-p256dh".to_string(),
            auth: "demo-auth".to_string(),
            created_at: Utc::now(),
        })
        .await?;
    store
        .put_preference(NotificationPreference::test_override(user_id, 5))
        .await?;

    info!(user_id, "seeded demo data (test-override preference, due every 5s)");
    Ok(())
}
