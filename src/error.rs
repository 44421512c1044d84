use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the daemon
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors raised while talking to the external ledger.
///
/// Everything except `InvalidAddress` is transient: the caller leaves its
/// state untouched and tries again on the next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("RPC request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to decode {what}: {message}")]
    Decode { what: String, message: String },
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ChainError::InvalidAddress(_))
    }
}

/// Errors returned by the external settlement call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("Settlement window exceeds the maximum slot range")]
    WindowExceeded,

    #[error("Settlement end marker is at or behind the stored marker")]
    StaleSettlement,

    #[error("Settlement rejected (code {code:?}): {message}")]
    Rejected { code: Option<u32>, message: String },

    #[error("Settlement transport failure: {0}")]
    Transport(#[from] ChainError),
}

/// How a failed settlement must be handled by the ledger owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Ledger is unsettleable as-is; re-anchor to the current position.
    ResetToCurrent,
    /// Validation failure; keep the ledger and count the failure.
    Retain,
    /// Network or timeout; keep the ledger, do not count it.
    Transient,
}

impl SettlementError {
    pub fn class(&self) -> FailureClass {
        match self {
            SettlementError::WindowExceeded | SettlementError::StaleSettlement => {
                FailureClass::ResetToCurrent
            }
            SettlementError::Rejected { .. } => FailureClass::Retain,
            SettlementError::Transport(_) => FailureClass::Transient,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Config(format!("Invalid JSON: {}", error))
    }
}

/// Error response body for the status surface
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Chain(_) => (StatusCode::BAD_GATEWAY, "CHAIN_ERROR"),
            AppError::Settlement(_) => (StatusCode::BAD_GATEWAY, "SETTLEMENT_ERROR"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
