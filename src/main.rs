use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use fleet_backoffice as backoffice;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = backoffice::config::load_config().context("failed to load configuration")?;
    backoffice::config::init_tracing(&cfg.log_level, cfg.log_json);
    backoffice::metrics::register_metrics();

    info!(
        environment = %cfg.environment,
        backend = ?cfg.store_backend,
        "Starting fleet back-office"
    );

    if cfg.is_production() && cfg.store_backend == backoffice::config::StoreBackend::Memory {
        warn!("In-memory store selected in production; nothing will be persisted");
    }

    let uow = backoffice::db::unit_of_work_from_config(&cfg)
        .await
        .context("failed to initialise the store")?;

    // Init events
    let (event_sender, event_rx) =
        backoffice::events::EventSender::channel(cfg.event_channel_capacity);
    let events_task = tokio::spawn(backoffice::events::process_events(event_rx));

    let mailer = Arc::new(backoffice::notifications::LoggingMailer::default());
    let services = backoffice::AppServices::new(uow, event_sender, mailer, &cfg);

    let scheduler = backoffice::workflows::spawn_maintenance_scheduler(
        (*services.maintenance).clone(),
        Duration::from_secs(cfg.maintenance_scan_interval_secs),
    );

    let registry = backoffice::CommandRegistry::with_defaults();
    info!(
        commands = ?registry.names().collect::<Vec<_>>(),
        "Back-office ready"
    );

    shutdown_signal().await;
    info!("Shutdown signal received, stopping background tasks");

    scheduler.abort();
    drop(services);
    if tokio::time::timeout(Duration::from_secs(5), events_task)
        .await
        .is_err()
    {
        warn!("Event processor did not drain in time");
    }
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
