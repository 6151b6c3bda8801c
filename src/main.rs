// =============================================================================
// Entry point
// =============================================================================

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use arena_engine::cli::{Cli, Command};
use arena_engine::config::Config;
use arena_engine::error::AppError;
use arena_engine::services::Services;
use arena_engine::{api, telemetry};

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    telemetry::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => run_start(&cli.config).await,
        Command::Reconcile => run_reconcile(&cli.config).await,
    };

    if let Err(err) = result {
        error!(error = %err, "fatal error");
        std::process::exit(err.exit_code());
    }
}

async fn run_start(config_path: &std::path::Path) -> Result<(), AppError> {
    let config = Config::load(config_path).map_err(|e| AppError::Config(e.to_string()))?;
    let bind_addr = config.bind_addr.clone();

    info!(symbols = ?config.symbols, agents = config.agents.len(), "starting engine");

    let services = Arc::new(
        Services::build(config)
            .await
            .map_err(AppError::TransportVenue)?,
    );

    let ctx = services.pipeline_context();
    let scheduler = services.spawn_scheduler(ctx);

    let router_services = services.clone();
    let router_scheduler = scheduler.clone();
    let server = tokio::spawn(async move {
        let app = api::rest::router(router_services, router_scheduler);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {bind_addr}: {e}"))?;
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("API server failed: {e}"))?;
        Ok::<(), anyhow::Error>(())
    });

    info!("engine running — press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Invariant(e.to_string()))?;
    warn!("shutdown signal received");

    scheduler.shutdown().await;
    server.abort();

    info!("shutdown complete");
    Ok(())
}

async fn run_reconcile(config_path: &std::path::Path) -> Result<(), AppError> {
    let config = Config::load(config_path).map_err(|e| AppError::Config(e.to_string()))?;
    let services = Services::build(config)
        .await
        .map_err(AppError::TransportVenue)?;

    let prices: std::collections::HashMap<String, rust_decimal::Decimal> = std::collections::HashMap::new();
    let report = arena_engine::reconcile::reconcile(
        services.venue.as_ref(),
        &services.accounts,
        &prices,
    )
    .await
    .map_err(AppError::TransportVenue)?;

    info!(
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        unowned = report.unowned,
        "reconciliation pass complete"
    );
    Ok(())
}
