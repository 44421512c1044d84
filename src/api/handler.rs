use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    daemon::{PendingReport, StatusBoard},
    error::{AppError, AppResult},
    risk::BreakerState,
    watcher::WatcherStatus,
};

#[derive(Clone)]
pub struct AppState {
    pub board: StatusBoard,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub watched: usize,
    pub running: usize,
    /// Labels of entities whose circuit breaker is open
    pub open_breakers: Vec<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.board.pending_report();
    let running = report.entities.iter().filter(|s| s.running).count();
    let open_breakers: Vec<String> = report
        .entities
        .iter()
        .filter(|s| s.breaker == BreakerState::Open)
        .map(|s| s.label.clone())
        .collect();

    let healthy = running == report.entities.len() && open_breakers.is_empty();

    Json(HealthResponse {
        status: if healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        watched: state.board.watched(),
        running,
        open_breakers,
    })
}

/// GET /pending - per-entity pending ledgers plus aggregate totals
pub async fn get_pending(State(state): State<AppState>) -> Json<PendingReport> {
    Json(state.board.pending_report())
}

/// GET /pending/:entity_id
pub async fn get_entity_pending(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> AppResult<Json<WatcherStatus>> {
    state
        .board
        .pending_report()
        .entities
        .into_iter()
        .find(|s| s.entity_id == entity_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("entity {} is not watched", entity_id)))
}
