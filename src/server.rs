use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{get_entity_pending, get_pending, health_check, AppState},
    error::AppResult,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up status routes...");

    Router::new()
        .route("/health", get(health_check))
        .route("/pending", get(get_pending))
        .route("/pending/:entity_id", get(get_entity_pending))
        .layer(CompressionLayer::new())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `stop` flips to `true`
pub async fn run_server(
    app: Router,
    bind_address: String,
    mut stop: watch::Receiver<bool>,
) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("🌐 Status server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await?;

    info!("🛑 Status server stopped");
    Ok(())
}
