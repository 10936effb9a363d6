use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;

use drover::config::Settings;
use drover::factory::{create_provider_registry, create_stores};
use drover::postgres::create_pool;
use drover::shutdown::GracefulShutdown;
use drover::tasks::MaintenanceTask;
use drover::telemetry::init_telemetry;
use drover::worker::DispatchWorker;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry_guard = init_telemetry();

    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    let pool = if settings.has_database() {
        Some(create_pool(&settings.database).await?)
    } else {
        None
    };

    let stores = create_stores(pool);
    let providers = create_provider_registry(&settings);
    tracing::info!(channels = ?providers.channels(), "Providers registered");

    let (shutdown_tx, _) = broadcast::channel(1);

    // Dispatch workers
    let mut handles = Vec::new();
    for worker_id in 0..settings.worker.count {
        let worker = DispatchWorker::new(
            worker_id,
            stores.queue.clone(),
            stores.deliveries.clone(),
            stores.log.clone(),
            providers.clone(),
            settings.worker.clone(),
        );
        handles.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
    }

    // Maintenance sweeps
    let maintenance = MaintenanceTask::new(
        settings.sweep.clone(),
        settings.retention.clone(),
        stores.queue.clone(),
        stores.deliveries.clone(),
        stores.log.clone(),
        stores.service.clone(),
        shutdown_tx.subscribe(),
    );
    handles.push(tokio::spawn(maintenance.run()));

    tracing::info!(workers = settings.worker.count, "Dispatch service running");

    wait_for_signal().await;

    let shutdown = GracefulShutdown::new(stores.queue.clone(), shutdown_tx);
    shutdown.execute("signal received").await;

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Dispatch service shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
