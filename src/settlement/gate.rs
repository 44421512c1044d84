use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{attribution::LedgerSnapshot, chain::LedgerClient, error::ChainError};

/// Why a ledger was discarded instead of settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// `end_marker - last_settled` exceeds the maximum window
    WindowExceeded,
    /// `end_marker` is at or behind the stored last-settled marker
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Safe to submit against `last_settled`
    Proceed { last_settled: u64 },
    /// Nothing to settle yet
    Wait,
    /// Unsettleable as-is; re-anchor the ledger at `anchor`
    Reset { anchor: u64, reason: ResetReason },
}

/// Pre-flight check run immediately before every settlement attempt.
///
/// The last-settled marker is read fresh on every call and never cached,
/// since other settlers may advance it independently.
pub struct SettlementGate {
    client: Arc<dyn LedgerClient>,
    max_window: u64,
}

impl SettlementGate {
    pub fn new(client: Arc<dyn LedgerClient>, max_window: u64) -> Self {
        Self { client, max_window }
    }

    pub fn max_window(&self) -> u64 {
        self.max_window
    }

    /// Decide what to do with `snapshot`. Read failures are returned so the
    /// caller can retain the ledger and retry on the next cycle.
    pub async fn check(
        &self,
        entity_id: &str,
        snapshot: &LedgerSnapshot,
    ) -> Result<GateDecision, ChainError> {
        if snapshot.fee_amount == 0 {
            return Ok(GateDecision::Wait);
        }

        let last_settled = self.client.last_settled_marker(entity_id).await?;

        let reason = if snapshot.end_marker <= last_settled {
            Some(ResetReason::Stale)
        } else if snapshot.end_marker - last_settled > self.max_window {
            Some(ResetReason::WindowExceeded)
        } else {
            None
        };

        let Some(reason) = reason else {
            debug!(
                "Gate open for {}: window {}..{} ({} slots)",
                entity_id,
                last_settled,
                snapshot.end_marker,
                snapshot.end_marker - last_settled
            );
            return Ok(GateDecision::Proceed { last_settled });
        };

        let current = self.client.current_position().await?;
        let mut anchor = current;
        // An idle entity's marker falls behind for good; move it forward
        // or every later ledger overflows the same way
        if reason == ResetReason::WindowExceeded
            && current.saturating_sub(last_settled) > self.max_window
            && resync_marker(self.client.as_ref(), entity_id).await
        {
            match self.client.last_settled_marker(entity_id).await {
                Ok(synced) => anchor = anchor.max(synced),
                Err(e) => warn!("⚠️ Synced marker for {} unreadable: {}", entity_id, e),
            }
        }

        warn!(
            "⚠️ Ledger for {} cannot be settled ({:?}: end {} vs last settled {}), re-anchoring at {}",
            entity_id, reason, snapshot.end_marker, last_settled, anchor
        );
        Ok(GateDecision::Reset { anchor, reason })
    }
}

/// Ask the ledger to move `entity_id`'s last-settled marker up to the current
/// position. Returns whether it moved; failures are logged and retried on the
/// next overflow.
pub(crate) async fn resync_marker(client: &dyn LedgerClient, entity_id: &str) -> bool {
    match client.sync_marker(entity_id).await {
        Ok(true) => {
            info!("🔁 Last settled marker for {} synced to current position", entity_id);
            true
        }
        Ok(false) => {
            debug!("Last settled marker for {} already within window", entity_id);
            false
        }
        Err(e) => {
            warn!("⚠️ Marker sync for {} failed, retrying on next overflow: {}", entity_id, e);
            false
        }
    }
}
