use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wms_stock_api::config::AppConfig;
use wms_stock_api::db::{establish_connection, run_migrations, DbConfig};
use wms_stock_api::events::{process_events, EventSender};
use wms_stock_api::scheduler::Scheduler;
use wms_stock_api::AppState;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);
    info!("Starting stock ledger worker");

    let db = establish_connection(&DbConfig::new(config.database_url.clone()))
        .await
        .context("failed to connect to database")?;
    if config.auto_migrate {
        run_migrations(&db).await.context("migrations failed")?;
    }

    let (event_sender, event_receiver) = EventSender::channel(config.event_buffer);
    let event_loop = tokio::spawn(process_events(event_receiver));

    let state = AppState::new(db, event_sender.clone());
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&state.stock_repo),
        Arc::clone(&state.lot_repo),
        Arc::clone(&state.reservation_service),
        event_sender,
        config.scheduler.clone(),
        config.expiry_alert_days.clone(),
        config.low_stock_threshold,
    ));
    let scheduler_handle = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    scheduler_handle.shutdown().await;
    // Dropping every EventSender closes the channel and ends the loop.
    drop(state);
    let _ = event_loop.await;
    info!("Stock ledger worker stopped");
    Ok(())
}
