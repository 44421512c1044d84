use futures::future::join_all;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    attribution::ExtractorConfig,
    chain::{ActivityFeed, LedgerClient},
    config::EntityWatch,
    error::{AppError, AppResult},
    settlement::{FlushScheduler, ScheduleConfig, SettlementAttempt},
    watcher::{EntityWatcher, WatcherContext, WatcherHandle, WatcherSettings, WatcherStatus},
};

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub max_window: u64,
    pub schedule: ScheduleConfig,
    pub watcher: WatcherSettings,
    pub extractor: ExtractorConfig,
    /// Budget for the final flush and watcher teardown
    pub shutdown_timeout: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            max_window: 1000,
            schedule: ScheduleConfig::default(),
            watcher: WatcherSettings::default(),
            extractor: ExtractorConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate view over every watched entity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReport {
    pub entities: Vec<WatcherStatus>,
    pub total_fee_amount: u64,
    pub total_event_count: u64,
}

/// Read-only access to published watcher state
#[derive(Clone)]
pub struct StatusBoard {
    watchers: Vec<WatcherHandle>,
}

impl StatusBoard {
    pub fn pending_report(&self) -> PendingReport {
        let entities: Vec<WatcherStatus> = self.watchers.iter().map(|h| h.status()).collect();
        let total_fee_amount = entities
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.ledger.fee_amount));
        let total_event_count = entities
            .iter()
            .map(|s| u64::from(s.ledger.event_count))
            .sum();

        PendingReport {
            entities,
            total_fee_amount,
            total_event_count,
        }
    }

    pub fn watched(&self) -> usize {
        self.watchers.len()
    }
}

/// Owns the watchers and the flush scheduler for the life of the process
pub struct Daemon {
    watchers: Vec<(WatcherHandle, JoinHandle<()>)>,
    scheduler: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl Daemon {
    /// Start one watcher per entity, then the scheduler. An entity that
    /// cannot be watched is logged and skipped; the rest still start.
    pub async fn start(
        watches: Vec<EntityWatch>,
        client: Arc<dyn LedgerClient>,
        feed: Arc<dyn ActivityFeed>,
        settings: DaemonSettings,
    ) -> AppResult<Self> {
        let context = WatcherContext::new(
            client.clone(),
            feed,
            settings.max_window,
            settings.extractor.clone(),
            settings.watcher.clone(),
        );

        let requested = watches.len();
        let started = join_all(watches.into_iter().map(|entity| {
            let context = context.clone();
            async move {
                let label = entity.label.clone();
                let entity_id = entity.entity_id.clone();
                match EntityWatcher::spawn(entity, context).await {
                    Ok(started) => Some(started),
                    Err(AppError::Chain(e)) if e.is_transient() => {
                        error!(
                            "❌ Not watching {} ({}): ledger unreachable at startup: {}",
                            label, entity_id, e
                        );
                        None
                    }
                    Err(e) => {
                        error!("❌ Not watching {} ({}): {}", label, entity_id, e);
                        None
                    }
                }
            }
        }))
        .await;
        let watchers: Vec<(WatcherHandle, JoinHandle<()>)> = started.into_iter().flatten().collect();

        if watchers.is_empty() {
            return Err(AppError::Config(format!(
                "none of the {} configured entities could be watched",
                requested
            )));
        }
        if watchers.len() < requested {
            warn!(
                "⚠️ Watching {} of {} configured entities",
                watchers.len(),
                requested
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles: Vec<WatcherHandle> = watchers.iter().map(|(h, _)| h.clone()).collect();
        let scheduler = FlushScheduler::new(settings.schedule, client, handles).start(shutdown_rx);

        info!("✅ Daemon started with {} watcher(s)", watchers.len());

        Ok(Self {
            watchers,
            scheduler,
            shutdown_tx,
            shutdown_timeout: settings.shutdown_timeout,
        })
    }

    pub fn status_board(&self) -> StatusBoard {
        StatusBoard {
            watchers: self.watchers.iter().map(|(h, _)| h.clone()).collect(),
        }
    }

    /// Current pending totals; no side effects
    pub fn pending_totals(&self) -> PendingReport {
        self.status_board().pending_report()
    }

    /// Stop the timers, run the forced final flush per entity, then stop
    /// every watcher. Returns the final attempts that ran.
    pub async fn shutdown(self) -> Vec<SettlementAttempt> {
        info!("🛑 Shutting down, stopping flush scheduler");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.scheduler.await {
            warn!("⚠️ Flush scheduler ended abnormally: {}", e);
        }

        let timeout = self.shutdown_timeout;
        let finals = join_all(self.watchers.into_iter().map(|(handle, task)| async move {
            let attempt = match tokio::time::timeout(timeout, handle.shutdown()).await {
                Ok(attempt) => attempt,
                Err(_) => {
                    error!(
                        "❌ {} did not finish its final flush within {:?}, abandoning it",
                        handle.label(),
                        timeout
                    );
                    task.abort();
                    return None;
                }
            };
            let _ = task.await;
            attempt
        }))
        .await;

        let attempts: Vec<SettlementAttempt> = finals.into_iter().flatten().collect();
        let settled = attempts.iter().filter(|a| a.outcome.is_settled()).count();
        info!(
            "✓ Shutdown complete: {} final settlement(s), {} landed",
            attempts.len(),
            settled
        );
        attempts
    }
}
