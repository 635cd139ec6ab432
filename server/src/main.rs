//! pricematch-server binary.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use pricematch::load_from_env;
use pricematch_server::{init_tracing, router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_from_env().inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    let state = Arc::new(AppState::from_config(&config).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = if config.scheduler.enabled {
        Some(state.scheduler.clone().spawn(shutdown_rx))
    } else {
        info!("Job scheduler disabled; relying on external cron triggers");
        None
    };

    let app = router(state);
    let listener = TcpListener::bind(&config.bind_address).await?;
    info!(addr = %config.bind_address, "pricematch-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
    Ok(())
}
