// In-memory ledger used by tests. Enforces the same settlement preconditions
// as the on-chain program so window safety can be asserted end to end.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};
use tokio::sync::mpsc;

use crate::chain::{
    ActivityFeed, ActivitySubscription, EventDetail, EventRef, LedgerClient, SettlementReceipt,
    SettlementRequest,
};
use crate::error::{ChainError, SettlementError};

#[derive(Default)]
struct MockState {
    current_position: u64,
    last_settled: HashMap<String, u64>,
    activity: HashMap<String, Vec<EventRef>>,
    details: HashMap<String, EventDetail>,
    failing_details: HashSet<String>,
    list_failure: bool,
    position_failure: bool,
    scripted_settlements: VecDeque<SettlementError>,
    attempts: Vec<SettlementRequest>,
    submissions: Vec<SettlementRequest>,
    syncs: Vec<String>,
    subscribers: HashMap<String, Vec<mpsc::Sender<u64>>>,
    delay: Option<Duration>,
    marker_delays: HashMap<String, Duration>,
}

pub struct MockLedger {
    max_window: u64,
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new(current_position: u64, max_window: u64) -> Self {
        Self {
            max_window,
            state: Mutex::new(MockState {
                current_position,
                ..MockState::default()
            }),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Slow down only `last_settled_marker` reads for `entity_id`
    pub fn set_marker_delay(&self, entity_id: &str, delay: Duration) {
        self.state
            .lock()
            .marker_delays
            .insert(entity_id.to_string(), delay);
    }

    pub fn set_position(&self, position: u64) {
        self.state.lock().current_position = position;
    }

    pub fn set_last_settled(&self, entity_id: &str, marker: u64) {
        self.state
            .lock()
            .last_settled
            .insert(entity_id.to_string(), marker);
    }

    pub fn last_settled(&self, entity_id: &str) -> u64 {
        self.state
            .lock()
            .last_settled
            .get(entity_id)
            .copied()
            .unwrap_or(0)
    }

    /// Register a fee-bearing event on `source` (newest first ordering is kept)
    pub fn add_event(&self, source: &str, detail: EventDetail) {
        let mut state = self.state.lock();
        let list = state.activity.entry(source.to_string()).or_default();
        list.push(EventRef {
            id: detail.id.clone(),
            marker: detail.marker,
            failed: false,
        });
        list.sort_by(|a, b| b.marker.cmp(&a.marker));
        state.details.insert(detail.id.clone(), detail);
    }

    pub fn add_failed_event(&self, source: &str, id: &str, marker: u64) {
        let mut state = self.state.lock();
        let list = state.activity.entry(source.to_string()).or_default();
        list.push(EventRef {
            id: id.to_string(),
            marker,
            failed: true,
        });
        list.sort_by(|a, b| b.marker.cmp(&a.marker));
    }

    pub fn fail_detail(&self, id: &str) {
        self.state.lock().failing_details.insert(id.to_string());
    }

    pub fn set_list_failure(&self, failing: bool) {
        self.state.lock().list_failure = failing;
    }

    pub fn set_position_failure(&self, failing: bool) {
        self.state.lock().position_failure = failing;
    }

    /// The next settlement call fails with `error` regardless of its arguments
    pub fn push_settle_error(&self, error: SettlementError) {
        self.state.lock().scripted_settlements.push_back(error);
    }

    /// Every settlement request received, accepted or not
    pub fn attempts(&self) -> Vec<SettlementRequest> {
        self.state.lock().attempts.clone()
    }

    /// Every settlement request that passed validation
    pub fn submissions(&self) -> Vec<SettlementRequest> {
        self.state.lock().submissions.clone()
    }

    /// Entities whose marker was moved by `sync_marker`
    pub fn syncs(&self) -> Vec<String> {
        self.state.lock().syncs.clone()
    }

    pub fn subscriber_count(&self, source: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(source)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Push a state-change notification to every live subscriber of `source`
    pub async fn notify(&self, source: &str, slot: u64) {
        let senders: Vec<mpsc::Sender<u64>> = self
            .state
            .lock()
            .subscribers
            .get(source)
            .cloned()
            .unwrap_or_default();
        for tx in senders {
            let _ = tx.send(slot).await;
        }
    }

    async fn pause(&self) {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn current_position(&self) -> Result<u64, ChainError> {
        self.pause().await;
        let state = self.state.lock();
        if state.position_failure {
            return Err(ChainError::Rpc("getSlot unavailable".into()));
        }
        Ok(state.current_position)
    }

    async fn last_settled_marker(&self, entity_id: &str) -> Result<u64, ChainError> {
        self.pause().await;
        let delay = self.state.lock().marker_delays.get(entity_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.last_settled(entity_id))
    }

    async fn list_recent_activity(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<EventRef>, ChainError> {
        self.pause().await;
        let state = self.state.lock();
        if state.list_failure {
            return Err(ChainError::Rpc("getSignaturesForAddress unavailable".into()));
        }
        Ok(state
            .activity
            .get(source)
            .map(|events| events.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn event_detail(&self, event: &EventRef) -> Result<Option<EventDetail>, ChainError> {
        self.pause().await;
        let state = self.state.lock();
        if state.failing_details.contains(&event.id) {
            return Err(ChainError::Rpc(format!("getTransaction {} failed", event.id)));
        }
        Ok(state.details.get(&event.id).cloned())
    }

    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        self.pause().await;
        let mut state = self.state.lock();
        state.attempts.push(request.clone());

        if let Some(error) = state.scripted_settlements.pop_front() {
            return Err(error);
        }

        let last = state
            .last_settled
            .get(&request.entity_id)
            .copied()
            .unwrap_or(0);
        if request.end_marker <= last {
            return Err(SettlementError::StaleSettlement);
        }
        if request.end_marker - last > self.max_window {
            return Err(SettlementError::WindowExceeded);
        }

        state
            .last_settled
            .insert(request.entity_id.clone(), request.end_marker);
        state.submissions.push(request.clone());

        Ok(SettlementReceipt {
            transaction_id: format!("mock-tx-{}", state.submissions.len()),
        })
    }

    async fn sync_marker(&self, entity_id: &str) -> Result<bool, SettlementError> {
        self.pause().await;
        let mut state = self.state.lock();
        let current = state.current_position;
        let last = state.last_settled.get(entity_id).copied().unwrap_or(0);
        if current.saturating_sub(last) <= self.max_window {
            return Ok(false);
        }

        state.last_settled.insert(entity_id.to_string(), current);
        state.syncs.push(entity_id.to_string());
        Ok(true)
    }
}

#[async_trait]
impl ActivityFeed for MockLedger {
    async fn subscribe(&self, source: &str) -> Result<ActivitySubscription, ChainError> {
        let (tx, rx) = mpsc::channel(64);
        self.state
            .lock()
            .subscribers
            .entry(source.to_string())
            .or_default()
            .push(tx);
        Ok(ActivitySubscription::new(rx, None))
    }
}
