use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// Immutable copy of a ledger, handed to settlement and status readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub fee_amount: u64,
    pub event_count: u32,
    pub start_marker: u64,
    pub end_marker: u64,
}

/// Unsettled fee attribution for a single entity.
///
/// INVARIANTS:
/// - `fee_amount` is the sum of the fees of exactly the events in `seen`
/// - `start_marker <= end_marker`
/// - an event id is counted at most once between resets
#[derive(Debug, Clone)]
pub struct PendingLedger {
    fee_amount: u64,
    seen: HashSet<String>,
    start_marker: u64,
    end_marker: u64,
}

impl PendingLedger {
    /// Fresh ledger anchored at `start_marker`
    pub fn new(start_marker: u64) -> Self {
        Self {
            fee_amount: 0,
            seen: HashSet::new(),
            start_marker,
            end_marker: start_marker,
        }
    }

    /// Count `fee` for `event_id` observed at `marker`.
    ///
    /// Returns `true` only when the event was counted. Duplicates and sums
    /// that would overflow change nothing. A zero fee is not counted either,
    /// but its marker still extends the observed window.
    pub fn accumulate(&mut self, event_id: &str, marker: u64, fee: u64) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }

        if fee == 0 {
            self.end_marker = self.end_marker.max(marker);
            return false;
        }

        let Some(total) = self.fee_amount.checked_add(fee) else {
            warn!(
                "Fee total overflow, dropping {} ({} + {})",
                event_id, self.fee_amount, fee
            );
            return false;
        };

        self.fee_amount = total;
        self.seen.insert(event_id.to_string());
        self.end_marker = self.end_marker.max(marker);
        true
    }

    /// Drop everything and re-anchor at `new_start_marker`
    pub fn reset(&mut self, new_start_marker: u64) {
        self.fee_amount = 0;
        self.seen.clear();
        self.start_marker = new_start_marker;
        self.end_marker = new_start_marker;
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            fee_amount: self.fee_amount,
            event_count: self.event_count(),
            start_marker: self.start_marker,
            end_marker: self.end_marker,
        }
    }

    pub fn is_seen(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    pub fn fee_amount(&self) -> u64 {
        self.fee_amount
    }

    pub fn event_count(&self) -> u32 {
        u32::try_from(self.seen.len()).unwrap_or(u32::MAX)
    }

    pub fn start_marker(&self) -> u64 {
        self.start_marker
    }

    pub fn end_marker(&self) -> u64 {
        self.end_marker
    }
}
