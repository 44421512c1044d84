// Entity watcher - one actor per watched entity
//
// The actor exclusively owns the entity's PendingLedger. Discovery (push
// notifications + recovery poll) and settlement (flush requests from the
// scheduler, forced flush on shutdown) are handled one at a time inside the
// same loop, so a settlement always sees a consistent ledger and no two
// settlements of one entity are ever in flight together.

use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    attribution::{ExtractorConfig, FeeExtractor, LedgerSnapshot, PendingLedger},
    chain::{ActivityFeed, ActivitySubscription, EventRef, LedgerClient},
    config::EntityWatch,
    error::AppResult,
    risk::{BreakerConfig, BreakerState, CircuitBreaker},
    settlement::{
        FlushTrigger, GateDecision, OnChainSettler, SettlementAttempt, SettlementGate,
        SettlementOutcome,
    },
};

/// Pending flushes per entity. A full queue means a flush is already due.
const COMMAND_BUFFER: usize = 2;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// N for the recent-activity listing
    pub recent_activity_limit: usize,
    /// Recovery poll period, independent of push notifications
    pub poll_interval: Duration,
    /// Anchor new ledgers at the last settled marker when it is recent enough
    pub rescan_on_start: bool,
    pub breaker: BreakerConfig,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            recent_activity_limit: 20,
            poll_interval: Duration::from_secs(15),
            rescan_on_start: false,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Collaborators shared by every watcher
#[derive(Clone)]
pub struct WatcherContext {
    pub client: Arc<dyn LedgerClient>,
    pub feed: Arc<dyn ActivityFeed>,
    pub gate: Arc<SettlementGate>,
    pub settler: Arc<OnChainSettler>,
    pub extractor: ExtractorConfig,
    pub settings: WatcherSettings,
}

impl WatcherContext {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        feed: Arc<dyn ActivityFeed>,
        max_window: u64,
        extractor: ExtractorConfig,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            gate: Arc::new(SettlementGate::new(client.clone(), max_window)),
            settler: Arc::new(OnChainSettler::new(client.clone())),
            client,
            feed,
            extractor,
            settings,
        }
    }
}

/// Published view of one watcher, readable without touching the actor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub entity_id: String,
    pub label: String,
    #[serde(flatten)]
    pub ledger: LedgerSnapshot,
    pub consecutive_failures: u32,
    pub breaker: BreakerState,
    pub last_attempt: Option<SettlementAttempt>,
    pub running: bool,
}

enum WatcherCommand {
    Flush {
        trigger: FlushTrigger,
        reply: Option<oneshot::Sender<SettlementAttempt>>,
    },
    Shutdown {
        reply: oneshot::Sender<Option<SettlementAttempt>>,
    },
}

/// Cloneable handle to a running watcher
#[derive(Clone)]
pub struct WatcherHandle {
    entity_id: Arc<str>,
    label: Arc<str>,
    commands: mpsc::Sender<WatcherCommand>,
    status: watch::Receiver<WatcherStatus>,
}

impl WatcherHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Latest published status; never waits on the actor
    pub fn status(&self) -> WatcherStatus {
        self.status.borrow().clone()
    }

    /// Queue a flush without waiting for it. Returns `false` if a flush is
    /// already queued or the watcher has stopped.
    pub fn request_flush(&self, trigger: FlushTrigger) -> bool {
        match self.commands.try_send(WatcherCommand::Flush {
            trigger,
            reply: None,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Flush for {} already queued", self.label);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Flush and wait for the attempt to complete
    #[cfg(test)]
    pub async fn flush_now(&self, trigger: FlushTrigger) -> Option<SettlementAttempt> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WatcherCommand::Flush {
                trigger,
                reply: Some(reply),
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Forced final flush, then stop. Returns the final attempt, if one ran.
    pub async fn shutdown(&self) -> Option<SettlementAttempt> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WatcherCommand::Shutdown { reply })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }
}

pub struct EntityWatcher {
    watch: EntityWatch,
    context: WatcherContext,
    extractor: FeeExtractor,
    ledger: PendingLedger,
    /// Events that carried no attributable fee, by marker, so they are not
    /// fetched again. Pruned on every reset.
    ignored: HashMap<String, u64>,
    breaker: CircuitBreaker,
    last_attempt: Option<SettlementAttempt>,
    status_tx: watch::Sender<WatcherStatus>,
}

impl EntityWatcher {
    /// Subscribe, anchor a fresh ledger and start the actor.
    ///
    /// Fails when the entity cannot be watched at all (bad address, ledger
    /// unreachable); the caller decides whether that is fatal.
    pub async fn spawn(
        watch: EntityWatch,
        context: WatcherContext,
    ) -> AppResult<(WatcherHandle, JoinHandle<()>)> {
        watch.validate()?;

        let subscription = context.feed.subscribe(&watch.activity_source).await?;
        let anchor = Self::initial_anchor(&watch, &context).await?;

        let ledger = PendingLedger::new(anchor);
        let breaker = CircuitBreaker::new(context.settings.breaker.clone());
        let initial = WatcherStatus {
            entity_id: watch.entity_id.clone(),
            label: watch.label.clone(),
            ledger: ledger.snapshot(),
            consecutive_failures: 0,
            breaker: breaker.state(),
            last_attempt: None,
            running: true,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let handle = WatcherHandle {
            entity_id: Arc::from(watch.entity_id.as_str()),
            label: Arc::from(watch.label.as_str()),
            commands: command_tx,
            status: status_rx,
        };

        info!(
            "👀 Watching {} ({}) from slot {}",
            watch.label, watch.entity_id, anchor
        );

        let watcher = Self {
            extractor: FeeExtractor::new(watch.fee_source.clone(), context.extractor.clone()),
            watch,
            context,
            ledger,
            ignored: HashMap::new(),
            breaker,
            last_attempt: None,
            status_tx,
        };
        let task = tokio::spawn(watcher.run(command_rx, subscription));

        Ok((handle, task))
    }

    async fn initial_anchor(watch: &EntityWatch, context: &WatcherContext) -> AppResult<u64> {
        let current = context.client.current_position().await?;
        if !context.settings.rescan_on_start {
            return Ok(current);
        }

        match context.client.last_settled_marker(&watch.entity_id).await {
            Ok(last) if last > 0 && current.saturating_sub(last) <= context.gate.max_window() => {
                info!(
                    "🔁 Rescanning {} from last settled slot {} (current {})",
                    watch.label, last, current
                );
                Ok(last)
            }
            Ok(last) => {
                debug!(
                    "Last settled slot {} for {} too old to rescan, anchoring at {}",
                    last, watch.label, current
                );
                Ok(current)
            }
            Err(e) => {
                warn!(
                    "⚠️ Rescan for {} skipped, last settled marker unavailable: {}",
                    watch.label, e
                );
                Ok(current)
            }
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WatcherCommand>,
        mut subscription: ActivitySubscription,
    ) {
        let mut poll = interval(self.context.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut feed_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WatcherCommand::Flush { trigger, reply }) => {
                        let attempt = self.flush(trigger).await;
                        if let Some(reply) = reply {
                            let _ = reply.send(attempt);
                        }
                    }
                    Some(WatcherCommand::Shutdown { reply }) => {
                        let attempt = self.final_flush().await;
                        let _ = reply.send(attempt);
                        break;
                    }
                    None => break,
                },
                notification = subscription.recv(), if feed_open => match notification {
                    Some(slot) => {
                        debug!("📡 {} activity at slot {}", self.watch.label, slot);
                        self.discover().await;
                    }
                    None => {
                        warn!(
                            "⚠️ Activity feed for {} ended, continuing on poll only",
                            self.watch.label
                        );
                        feed_open = false;
                    }
                },
                _ = poll.tick() => self.discover().await,
            }
        }

        drop(subscription);
        self.publish(false);
        info!("🛑 Stopped watching {}", self.watch.label);
    }

    /// One discovery pass over the most recent activity
    async fn discover(&mut self) {
        let recent = match self
            .context
            .client
            .list_recent_activity(
                &self.watch.activity_source,
                self.context.settings.recent_activity_limit,
            )
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                warn!(
                    "⚠️ Listing activity for {} failed, retrying next tick: {}",
                    self.watch.label, e
                );
                return;
            }
        };

        let mut fresh: Vec<EventRef> = recent
            .into_iter()
            .filter(|event| self.is_new(event))
            .collect();
        fresh.sort_by_key(|event| event.marker);

        let mut counted = 0usize;
        for event in fresh {
            let detail = match self.context.client.event_detail(&event).await {
                Ok(Some(detail)) => detail,
                Ok(None) => {
                    debug!("Event {} not found yet", event.id);
                    continue;
                }
                Err(e) => {
                    warn!("⚠️ Skipping event {} for {}: {}", event.id, self.watch.label, e);
                    continue;
                }
            };

            let fee = self.extractor.extract(&detail);
            if self.ledger.accumulate(&event.id, event.marker, fee) {
                counted += 1;
            } else if fee == 0 {
                self.ignored.insert(event.id, event.marker);
            }
        }

        if counted > 0 {
            info!(
                "📥 {}: {} new fee event(s), pending {} lamports over {} event(s) (slots {}..{})",
                self.watch.label,
                counted,
                self.ledger.fee_amount(),
                self.ledger.event_count(),
                self.ledger.start_marker(),
                self.ledger.end_marker()
            );
        }
        self.publish(true);
    }

    fn is_new(&self, event: &EventRef) -> bool {
        !event.failed
            && event.marker > self.ledger.start_marker()
            && !self.ledger.is_seen(&event.id)
            && !self.ignored.contains_key(&event.id)
    }

    async fn flush(&mut self, trigger: FlushTrigger) -> SettlementAttempt {
        let snapshot = self.ledger.snapshot();
        let outcome = self.settle(trigger, &snapshot).await;
        let attempt = SettlementAttempt::new(&self.watch.entity_id, trigger, &snapshot, outcome);

        if attempt.outcome != SettlementOutcome::Waiting {
            self.last_attempt = Some(attempt.clone());
        }
        self.publish(true);
        attempt
    }

    async fn settle(&mut self, trigger: FlushTrigger, snapshot: &LedgerSnapshot) -> SettlementOutcome {
        // The forced shutdown flush ignores the breaker
        if snapshot.fee_amount > 0
            && trigger != FlushTrigger::Shutdown
            && !self.breaker.allows_attempt(&self.watch.label)
        {
            debug!("Circuit breaker open for {}, flush suppressed", self.watch.label);
            return SettlementOutcome::Suppressed;
        }

        let decision = match self.context.gate.check(&self.watch.entity_id, snapshot).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "⚠️ Settlement gate for {} unavailable, retrying next cycle: {}",
                    self.watch.label, e
                );
                return SettlementOutcome::Deferred {
                    message: e.to_string(),
                };
            }
        };

        match decision {
            GateDecision::Wait => SettlementOutcome::Waiting,
            GateDecision::Reset { anchor, reason } => {
                self.reset(anchor);
                SettlementOutcome::Reset { anchor, reason }
            }
            GateDecision::Proceed { .. } => {
                info!(
                    "🔄 Settling {} ({:?}): {} lamports, {} event(s), up to slot {}",
                    self.watch.label,
                    trigger,
                    snapshot.fee_amount,
                    snapshot.event_count,
                    snapshot.end_marker
                );
                let outcome = self
                    .context
                    .settler
                    .submit(&self.watch.entity_id, snapshot)
                    .await;
                self.apply(&outcome);
                outcome
            }
        }
    }

    fn apply(&mut self, outcome: &SettlementOutcome) {
        match outcome {
            SettlementOutcome::Settled { end_marker, .. } => {
                self.reset(*end_marker);
                self.breaker.record_success(&self.watch.label);
            }
            SettlementOutcome::Reset { anchor, .. } => self.reset(*anchor),
            SettlementOutcome::Rejected { .. } => {
                self.breaker.record_rejection(&self.watch.label);
            }
            SettlementOutcome::Deferred { .. }
            | SettlementOutcome::Waiting
            | SettlementOutcome::Suppressed => {}
        }
    }

    fn reset(&mut self, anchor: u64) {
        self.ledger.reset(anchor);
        self.ignored.retain(|_, marker| *marker > anchor);
    }

    /// Best-effort settlement of whatever is pending. Not retried.
    async fn final_flush(&mut self) -> Option<SettlementAttempt> {
        if self.ledger.fee_amount() == 0 {
            return None;
        }

        let attempt = self.flush(FlushTrigger::Shutdown).await;
        if !attempt.outcome.is_settled() {
            error!(
                "❌ Final settlement for {} did not land, {} lamports left unsettled: {:?}",
                self.watch.label, attempt.fee_amount, attempt.outcome
            );
        }
        Some(attempt)
    }

    fn publish(&self, running: bool) {
        self.status_tx.send_replace(WatcherStatus {
            entity_id: self.watch.entity_id.clone(),
            label: self.watch.label.clone(),
            ledger: self.ledger.snapshot(),
            consecutive_failures: self.breaker.consecutive_failures(),
            breaker: self.breaker.state(),
            last_attempt: self.last_attempt.clone(),
            running,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{mock::MockLedger, EventDetail},
        error::{AppError, SettlementError},
        settlement::ResetReason,
    };

    const VAULT: &str = "Vault111";
    const CURVE: &str = "Curve111";

    fn entity() -> EntityWatch {
        EntityWatch {
            entity_id: "MintA".into(),
            activity_source: CURVE.into(),
            fee_source: VAULT.into(),
            label: "AAA".into(),
        }
    }

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

    fn no_fee_event(id: &str, marker: u64) -> EventDetail {
        EventDetail {
            id: id.into(),
            marker,
            log_lines: vec!["Program log: Instruction: Buy".into()],
            account_keys: vec![],
            pre_balances: vec![],
            post_balances: vec![],
        }
    }

    fn context(mock: &Arc<MockLedger>, settings: WatcherSettings) -> WatcherContext {
        WatcherContext::new(
            mock.clone(),
            mock.clone(),
            1000,
            ExtractorConfig::default(),
            settings,
        )
    }

    async fn settle_tasks() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_accumulates_distinct_events_once() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event(CURVE, fee_event("sig-old", 90, 7_000_000));
        mock.add_event(CURVE, fee_event("sig-1", 101, 1_000_000));
        mock.add_event(CURVE, fee_event("sig-2", 105, 2_000_000));
        mock.add_event(CURVE, no_fee_event("sig-3", 110));
        mock.add_failed_event(CURVE, "sig-failed", 111);

        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;

        let status = handle.status();
        assert_eq!(status.ledger.fee_amount, 3_000_000);
        assert_eq!(status.ledger.event_count, 2);
        assert_eq!(status.ledger.start_marker, 100);
        assert_eq!(status.ledger.end_marker, 110);

        // A second pass over the same listing changes nothing
        tokio::time::sleep(Duration::from_secs(16)).await;
        let status = handle.status();
        assert_eq!(status.ledger.fee_amount, 3_000_000);
        assert_eq!(status.ledger.event_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_failure_skips_only_that_event() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event(CURVE, fee_event("sig-1", 101, 1_000_000));
        mock.add_event(CURVE, fee_event("sig-2", 102, 2_000_000));
        mock.fail_detail("sig-1");

        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;
        assert_eq!(handle.status().ledger.fee_amount, 2_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_failure_leaves_ledger_untouched_until_next_tick() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event(CURVE, fee_event("sig-1", 101, 1_000_000));
        mock.set_list_failure(true);

        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;
        assert_eq!(handle.status().ledger.fee_amount, 0);

        mock.set_list_failure(false);
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(handle.status().ledger.fee_amount, 1_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_triggers_discovery() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;
        assert_eq!(mock.subscriber_count(CURVE), 1);

        mock.add_event(CURVE, fee_event("sig-1", 120, 4_200_000));
        mock.notify(CURVE, 120).await;
        settle_tasks().await;

        assert_eq!(handle.status().ledger.fee_amount, 4_200_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_flush_restarts_at_settled_marker() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event(CURVE, fee_event("sig-1", 101, 1_000_000));
        mock.add_event(CURVE, fee_event("sig-2", 105, 2_000_000));

        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;

        let attempt = handle.flush_now(FlushTrigger::Interval).await.unwrap();
        assert!(attempt.outcome.is_settled());
        assert_eq!(attempt.fee_amount, 3_000_000);
        assert_eq!(attempt.event_count, 2);

        let status = handle.status();
        assert_eq!(status.ledger.fee_amount, 0);
        assert_eq!(status.ledger.start_marker, 105);
        assert_eq!(status.ledger.end_marker, 105);
        assert!(status.last_attempt.is_some());

        // Already settled events are never counted again
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(handle.status().ledger.fee_amount, 0);
        assert_eq!(mock.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_flush_reanchors_at_current_position() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event(CURVE, fee_event("sig-1", 101, 1_000_000));

        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;

        // Someone else settled past our window
        mock.set_last_settled("MintA", 150);
        mock.set_position(160);

        let attempt = handle.flush_now(FlushTrigger::Interval).await.unwrap();
        assert_eq!(
            attempt.outcome,
            SettlementOutcome::Reset {
                anchor: 160,
                reason: ResetReason::Stale
            }
        );
        assert!(mock.attempts().is_empty());

        let status = handle.status();
        assert_eq!(status.ledger.fee_amount, 0);
        assert_eq!(status.ledger.start_marker, 160);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_suppresses_after_repeated_rejections() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.add_event(CURVE, fee_event("sig-1", 101, 1_000_000));
        for _ in 0..2 {
            mock.push_settle_error(SettlementError::Rejected {
                code: Some(6022),
                message: "FeeTooHigh".into(),
            });
        }

        let settings = WatcherSettings {
            breaker: BreakerConfig {
                max_consecutive_failures: 2,
                cooldown: Duration::from_secs(600),
            },
            ..WatcherSettings::default()
        };
        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, settings))
            .await
            .unwrap();
        settle_tasks().await;

        for _ in 0..2 {
            let attempt = handle.flush_now(FlushTrigger::Interval).await.unwrap();
            assert!(matches!(attempt.outcome, SettlementOutcome::Rejected { .. }));
        }

        let status = handle.status();
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.breaker, BreakerState::Open);
        assert_eq!(status.ledger.fee_amount, 1_000_000);

        let attempt = handle.flush_now(FlushTrigger::Adaptive).await.unwrap();
        assert_eq!(attempt.outcome, SettlementOutcome::Suppressed);
        assert_eq!(mock.attempts().len(), 2);

        // Shutdown still tries once more
        let last = handle.shutdown().await.unwrap();
        assert!(last.outcome.is_settled());
        assert_eq!(mock.last_settled("MintA"), 101);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_without_pending_fee_skips_settlement() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        let (handle, task) = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default()))
            .await
            .unwrap();
        settle_tasks().await;

        assert!(handle.shutdown().await.is_none());
        task.await.unwrap();
        assert!(!handle.status().running);
        assert_eq!(mock.subscriber_count(CURVE), 0);
        assert!(mock.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_anchors_at_recent_last_settled_marker() {
        let mock = Arc::new(MockLedger::new(600, 1000));
        mock.set_last_settled("MintA", 400);
        mock.add_event(CURVE, fee_event("sig-before", 400, 9_000_000));
        mock.add_event(CURVE, fee_event("sig-after", 450, 1_500_000));

        let settings = WatcherSettings {
            rescan_on_start: true,
            ..WatcherSettings::default()
        };
        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, settings))
            .await
            .unwrap();
        settle_tasks().await;

        let status = handle.status();
        assert_eq!(status.ledger.start_marker, 400);
        assert_eq!(status.ledger.fee_amount, 1_500_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_skips_stale_last_settled_marker() {
        let mock = Arc::new(MockLedger::new(5000, 1000));
        mock.set_last_settled("MintA", 400);

        let settings = WatcherSettings {
            rescan_on_start: true,
            ..WatcherSettings::default()
        };
        let (handle, _task) = EntityWatcher::spawn(entity(), context(&mock, settings))
            .await
            .unwrap();
        assert_eq!(handle.status().ledger.start_marker, 5000);
    }

    #[tokio::test]
    async fn test_unreachable_ledger_refuses_to_start() {
        let mock = Arc::new(MockLedger::new(100, 1000));
        mock.set_position_failure(true);

        let result = EntityWatcher::spawn(entity(), context(&mock, WatcherSettings::default())).await;
        assert!(matches!(result, Err(AppError::Chain(_))));
    }
}
