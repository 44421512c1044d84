mod api;
mod attribution;
mod bootstrap;
mod chain;
mod config;
mod daemon;
mod error;
mod risk;
mod server;
mod settlement;
mod watcher;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{api::handler::AppState, config::Config};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,fee_daemon=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting fee attribution daemon");

    let config = Config::load()?;
    let daemon = bootstrap::start_daemon(&config).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let status_server = config.status_bind_address.clone().map(|bind_address| {
        let app = server::create_app(AppState {
            board: daemon.status_board(),
        });
        tokio::spawn(server::run_server(app, bind_address, stop_rx))
    });

    shutdown_signal().await;

    let finals = daemon.shutdown().await;
    info!("Final flush produced {} settlement attempt(s)", finals.len());

    let _ = stop_tx.send(true);
    if let Some(handle) = status_server {
        match handle.await {
            Ok(Err(e)) => error!("❌ Status server failed: {}", e),
            Err(e) => error!("❌ Status server task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    info!("👋 Daemon stopped");
    Ok(())
}
