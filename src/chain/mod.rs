// External ledger interfaces consumed by the attribution core.
//
// Everything the core needs from the chain goes through `LedgerClient`
// (reads + settlement) and `ActivityFeed` (push notifications). The Solana
// implementations live in `solana` and `pubsub`; tests use `mock`.
pub mod pubsub;
pub mod solana;
pub mod throttle;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::{ChainError, SettlementError};

/// Reference to one activity record, as returned by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    /// Raw event identifier (transaction signature)
    pub id: String,
    /// External position the event landed at (slot)
    pub marker: u64,
    /// The event failed on-chain and cannot carry a fee
    pub failed: bool,
}

/// Full raw detail of one activity record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDetail {
    pub id: String,
    pub marker: u64,
    pub log_lines: Vec<String>,
    /// Account keys in balance-snapshot order
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
}

/// Arguments of one settlement call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementRequest {
    pub entity_id: String,
    pub fee_amount: u64,
    pub end_marker: u64,
    pub event_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    /// Opaque transaction identifier
    pub transaction_id: String,
}

/// Read and settlement access to the external ledger
///
/// INVARIANTS:
/// - `settle` is idempotent on the external side: a replay of an already
///   settled window is rejected as stale, never double-counted
/// - `last_settled_marker` is never cached by implementations
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Monotonic external clock (slot)
    async fn current_position(&self) -> Result<u64, ChainError>;

    /// Marker stored by the last successful settlement for `entity_id`
    async fn last_settled_marker(&self, entity_id: &str) -> Result<u64, ChainError>;

    /// Most recent activity for `source`, newest first
    async fn list_recent_activity(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<EventRef>, ChainError>;

    /// Raw detail for `event`, `None` when the ledger no longer has it
    async fn event_detail(&self, event: &EventRef) -> Result<Option<EventDetail>, ChainError>;

    /// Commit an attested fee total
    async fn settle(&self, request: &SettlementRequest)
        -> Result<SettlementReceipt, SettlementError>;

    /// Move the last-settled marker of an idle entity up to the current
    /// position so settlement can resume. `Ok(false)` when the marker is
    /// still within the window and nothing changed.
    async fn sync_marker(&self, entity_id: &str) -> Result<bool, SettlementError>;
}

/// Push notifications of state changes on an activity source
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn subscribe(&self, source: &str) -> Result<ActivitySubscription, ChainError>;
}

/// Live subscription; dropping it unsubscribes.
pub struct ActivitySubscription {
    notifications: mpsc::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl ActivitySubscription {
    pub fn new(notifications: mpsc::Receiver<u64>, task: Option<JoinHandle<()>>) -> Self {
        Self { notifications, task }
    }

    /// Next notification slot, `None` once the feed has ended
    pub async fn recv(&mut self) -> Option<u64> {
        self.notifications.recv().await
    }
}

impl Drop for ActivitySubscription {
    fn drop(&mut self) {
        self.notifications.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Wraps a `LedgerClient` so every call is bounded by `timeout`.
///
/// An elapsed timeout surfaces as `ChainError::Timeout`, which callers treat
/// exactly like any other transient failure.
pub struct TimeoutLedger {
    inner: Arc<dyn LedgerClient>,
    timeout: Duration,
}

impl TimeoutLedger {
    pub fn new(inner: Arc<dyn LedgerClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>> + Send,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl LedgerClient for TimeoutLedger {
    async fn current_position(&self) -> Result<u64, ChainError> {
        self.bounded(self.inner.current_position()).await
    }

    async fn last_settled_marker(&self, entity_id: &str) -> Result<u64, ChainError> {
        self.bounded(self.inner.last_settled_marker(entity_id)).await
    }

    async fn list_recent_activity(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<EventRef>, ChainError> {
        self.bounded(self.inner.list_recent_activity(source, limit)).await
    }

    async fn event_detail(&self, event: &EventRef) -> Result<Option<EventDetail>, ChainError> {
        self.bounded(self.inner.event_detail(event)).await
    }

    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        tokio::time::timeout(self.timeout, self.inner.settle(request))
            .await
            .map_err(|_| SettlementError::Transport(ChainError::Timeout(self.timeout)))?
    }

    async fn sync_marker(&self, entity_id: &str) -> Result<bool, SettlementError> {
        tokio::time::timeout(self.timeout, self.inner.sync_marker(entity_id))
            .await
            .map_err(|_| SettlementError::Transport(ChainError::Timeout(self.timeout)))?
    }
}
