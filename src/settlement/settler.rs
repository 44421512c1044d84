use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    attribution::LedgerSnapshot,
    chain::{LedgerClient, SettlementRequest},
    error::{FailureClass, SettlementError},
    settlement::{gate::resync_marker, FlushTrigger, ResetReason},
};

/// Result of one flush, as reported to the ledger owner and status readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Committed; the ledger restarts at `end_marker`
    Settled {
        transaction_id: String,
        fee_amount: u64,
        end_marker: u64,
        event_count: u32,
    },
    /// Window or staleness rejection; the ledger restarts at `anchor`
    Reset { anchor: u64, reason: ResetReason },
    /// Validation failure; ledger retained and counted against the breaker
    Rejected { code: Option<u32>, message: String },
    /// Transport failure or timeout; ledger retained, retried next cycle
    Deferred { message: String },
    /// Nothing to settle
    Waiting,
    /// Circuit breaker open
    Suppressed,
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled { .. })
    }
}

/// One flush of one entity: the triple that was (or would have been)
/// submitted plus what came of it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementAttempt {
    pub attempt_id: Uuid,
    pub entity_id: String,
    pub trigger: FlushTrigger,
    pub fee_amount: u64,
    pub end_marker: u64,
    pub event_count: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: SettlementOutcome,
}

impl SettlementAttempt {
    pub fn new(
        entity_id: &str,
        trigger: FlushTrigger,
        snapshot: &LedgerSnapshot,
        outcome: SettlementOutcome,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            trigger,
            fee_amount: snapshot.fee_amount,
            end_marker: snapshot.end_marker,
            event_count: snapshot.event_count,
            started_at: Utc::now(),
            outcome,
        }
    }
}

/// Submits gated ledgers and classifies the external response
pub struct OnChainSettler {
    client: Arc<dyn LedgerClient>,
}

impl OnChainSettler {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self { client }
    }

    #[instrument(skip(self, snapshot), fields(entity = %entity_id, fee = snapshot.fee_amount, end = snapshot.end_marker))]
    pub async fn submit(&self, entity_id: &str, snapshot: &LedgerSnapshot) -> SettlementOutcome {
        let request = SettlementRequest {
            entity_id: entity_id.to_string(),
            fee_amount: snapshot.fee_amount,
            end_marker: snapshot.end_marker,
            event_count: snapshot.event_count,
        };

        let error = match self.client.settle(&request).await {
            Ok(receipt) => {
                info!(
                    "✓ Settled {} lamports over {} event(s) up to slot {}: {}",
                    request.fee_amount, request.event_count, request.end_marker, receipt.transaction_id
                );
                return SettlementOutcome::Settled {
                    transaction_id: receipt.transaction_id,
                    fee_amount: request.fee_amount,
                    end_marker: request.end_marker,
                    event_count: request.event_count,
                };
            }
            Err(error) => error,
        };

        match error.class() {
            FailureClass::ResetToCurrent => {
                let reason = match error {
                    SettlementError::StaleSettlement => ResetReason::Stale,
                    _ => ResetReason::WindowExceeded,
                };
                // A no-op on the ledger side unless the marker itself is idle
                if reason == ResetReason::WindowExceeded {
                    resync_marker(self.client.as_ref(), entity_id).await;
                }
                match self.client.current_position().await {
                    Ok(anchor) => {
                        warn!(
                            "⚠️ Settlement refused ({}), discarding ledger and re-anchoring at {}",
                            error, anchor
                        );
                        SettlementOutcome::Reset { anchor, reason }
                    }
                    // The gate catches the same condition on the next cycle
                    Err(e) => {
                        warn!(
                            "⚠️ Settlement refused ({}) but current position unavailable: {}",
                            error, e
                        );
                        SettlementOutcome::Deferred {
                            message: format!("{}; current position unavailable: {}", error, e),
                        }
                    }
                }
            }
            FailureClass::Retain => {
                error!("❌ Settlement rejected, ledger retained: {}", error);
                let (code, message) = match error {
                    SettlementError::Rejected { code, message } => (code, message),
                    other => (None, other.to_string()),
                };
                SettlementOutcome::Rejected { code, message }
            }
            FailureClass::Transient => {
                warn!("⚠️ Settlement deferred: {}", error);
                SettlementOutcome::Deferred {
                    message: error.to_string(),
                }
            }
        }
    }
}
