// Flush scheduler - drives settlement attempts per entity
//
// Two kinds of timer:
// - Fixed interval: every entity with a nonzero pending fee is asked to flush
// - Adaptive check, one loop per entity: an entity whose pending window has
//   grown past the threshold is asked to flush immediately, ahead of the
//   fixed timer. A slow marker read only delays that entity's own checks.
//
// The scheduler never touches ledger state. It only sends flush requests to
// the owning watcher, which runs the gate and the settler itself.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{chain::LedgerClient, risk::BreakerState, watcher::WatcherHandle};

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    Interval,
    Adaptive,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub flush_interval: Duration,
    pub adaptive_check_interval: Duration,
    /// Slot delta (`end_marker - last_settled`) that triggers an early flush
    pub adaptive_threshold: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            adaptive_check_interval: Duration::from_secs(5),
            adaptive_threshold: 800,
        }
    }
}

pub struct FlushScheduler {
    config: ScheduleConfig,
    client: Arc<dyn LedgerClient>,
    watchers: Vec<WatcherHandle>,
}

impl FlushScheduler {
    pub fn new(
        config: ScheduleConfig,
        client: Arc<dyn LedgerClient>,
        watchers: Vec<WatcherHandle>,
    ) -> Self {
        Self {
            config,
            client,
            watchers,
        }
    }

    /// Start the fixed timer and one adaptive loop per entity. They stop
    /// once `shutdown` flips to `true`.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::new(self);

        let fixed = tokio::spawn(Self::run_fixed(scheduler.clone(), shutdown.clone()));
        let adaptive: Vec<JoinHandle<()>> = (0..scheduler.watchers.len())
            .map(|index| tokio::spawn(Self::run_adaptive(scheduler.clone(), index, shutdown.clone())))
            .collect();

        tokio::spawn(async move {
            let _ = fixed.await;
            join_all(adaptive).await;
            info!("🛑 Flush scheduler stopped");
        })
    }

    async fn run_fixed(scheduler: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(scheduler.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; nothing has accumulated yet
        ticker.tick().await;

        info!(
            "⏰ Fixed flush every {:?} for {} entities",
            scheduler.config.flush_interval,
            scheduler.watchers.len()
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let sent = scheduler.flush_tick();
                    debug!("🔄 Fixed flush tick: {} flush request(s)", sent);
                }
            }
        }
    }

    async fn run_adaptive(scheduler: Arc<Self>, index: usize, mut shutdown: watch::Receiver<bool>) {
        let Some(handle) = scheduler.watchers.get(index) else {
            return;
        };
        let mut ticker = interval(scheduler.config.adaptive_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    // A read slower than the period skips this entity's
                    // missed ticks; other entities keep their own pace
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = scheduler.adaptive_check(handle) => {}
                    }
                }
            }
        }
    }

    /// Ask every entity with a pending fee to flush. Returns the number of
    /// requests delivered.
    pub fn flush_tick(&self) -> usize {
        self.watchers
            .iter()
            .filter(|handle| handle.status().ledger.fee_amount > 0)
            .filter(|handle| handle.request_flush(FlushTrigger::Interval))
            .count()
    }

    /// Flush `handle` early when its window is approaching the maximum.
    /// Returns whether a request was delivered.
    pub async fn adaptive_check(&self, handle: &WatcherHandle) -> bool {
        let status = handle.status();
        if status.ledger.event_count == 0 || status.breaker == BreakerState::Open {
            return false;
        }

        let last_settled = match self.client.last_settled_marker(handle.entity_id()).await {
            Ok(marker) => marker,
            Err(e) => {
                warn!(
                    "⚠️ Adaptive check for {} skipped, last settled marker unavailable: {}",
                    handle.label(),
                    e
                );
                return false;
            }
        };

        let delta = status.ledger.end_marker.saturating_sub(last_settled);
        if delta < self.config.adaptive_threshold {
            return false;
        }

        info!(
            "📈 {} window at {} slots (threshold {}), flushing early",
            handle.label(),
            delta,
            self.config.adaptive_threshold
        );
        handle.request_flush(FlushTrigger::Adaptive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attribution::ExtractorConfig,
        chain::{mock::MockLedger, EventDetail},
        config::EntityWatch,
        watcher::{EntityWatcher, WatcherContext, WatcherSettings},
    };

    fn fee_event(id: &str, marker: u64, fee: u64) -> EventDetail {
        EventDetail {
            id: id.into(),
            marker,
            log_lines: vec![format!("Transfer: {} lamports to creator-vault", fee)],
            account_keys: vec![],
            pre_balances: vec![],
            post_balances: vec![],
        }
    }

    async fn spawn_watcher(mock: &Arc<MockLedger>, name: &str) -> WatcherHandle {
        let context = WatcherContext::new(
            mock.clone(),
            mock.clone(),
            1000,
            ExtractorConfig::default(),
            WatcherSettings::default(),
        );
        let entity = EntityWatch {
            entity_id: format!("Mint{}", name),
            activity_source: format!("Curve{}", name),
            fee_source: format!("Vault{}", name),
            label: name.to_string(),
        };
        let (handle, _task) = EntityWatcher::spawn(entity, context).await.unwrap();
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_tick_only_flushes_entities_with_pending_fee() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event("CurveA", fee_event("sig-a", 110, 1_000_000));

        let a = spawn_watcher(&mock, "A").await;
        let b = spawn_watcher(&mock, "B").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let scheduler = FlushScheduler::new(ScheduleConfig::default(), mock.clone(), vec![a, b]);
        assert_eq!(scheduler.flush_tick(), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let submissions = mock.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].entity_id, "MintA");
        assert_eq!(submissions[0].end_marker, 110);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_check_flushes_only_entities_past_threshold() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.set_last_settled("MintA", 100);
        mock.set_last_settled("MintB", 100);
        // A is 850 slots past its last settlement, B only 50
        mock.add_event("CurveA", fee_event("sig-a", 950, 1_000_000));
        mock.add_event("CurveB", fee_event("sig-b", 150, 1_000_000));

        let a = spawn_watcher(&mock, "A").await;
        let b = spawn_watcher(&mock, "B").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let scheduler =
            FlushScheduler::new(ScheduleConfig::default(), mock.clone(), vec![a.clone(), b.clone()]);
        assert!(scheduler.adaptive_check(&a).await);
        assert!(!scheduler.adaptive_check(&b).await);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(mock.last_settled("MintA"), 950);
        assert_eq!(mock.last_settled("MintB"), 100);
        assert_eq!(b.status().ledger.fee_amount, 1_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_marker_read_does_not_hold_back_other_entities() {
        let mock = Arc::new(MockLedger::new(2000, 1000));
        mock.set_last_settled("MintA", 100);
        mock.set_last_settled("MintB", 100);
        mock.set_marker_delay("MintA", Duration::from_secs(20));
        mock.add_event("CurveA", fee_event("sig-a", 150, 1_000_000));
        mock.add_event("CurveB", fee_event("sig-b1", 950, 1_000_000));

        let a = spawn_watcher(&mock, "A").await;
        let b = spawn_watcher(&mock, "B").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = FlushScheduler::new(ScheduleConfig::default(), mock.clone(), vec![a, b]).start(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(mock.last_settled("MintB"), 950);

        // A's first marker read is still pending; B's next check runs on time
        mock.add_event("CurveB", fee_event("sig-b2", 1800, 1_000_000));
        mock.notify("CurveB", 1800).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.last_settled("MintB"), 1800);
        assert_eq!(mock.last_settled("MintA"), 100);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_until_shutdown() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event("CurveA", fee_event("sig-a", 110, 1_000_000));
        let a = spawn_watcher(&mock, "A").await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = FlushScheduler::new(ScheduleConfig::default(), mock.clone(), vec![a]).start(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(mock.submissions().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.submissions().len(), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
