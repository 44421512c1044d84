use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_sdk::pubkey::Pubkey;
use std::{str::FromStr, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    chain::{ActivityFeed, ActivitySubscription},
    error::ChainError,
};

/// Notification buffer per subscription. Discovery re-lists recent activity
/// on every tick, so dropped notifications only delay attribution.
const NOTIFICATION_BUFFER: usize = 32;

const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// `accountSubscribe` based activity feed with automatic reconnect
pub struct SolanaActivityFeed {
    ws_url: String,
}

enum StreamEnd {
    Unsubscribed,
    Disconnected,
}

impl SolanaActivityFeed {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    async fn run(ws_url: String, account: Pubkey, tx: mpsc::Sender<u64>) {
        let mut attempt: u32 = 0;

        loop {
            match Self::stream_once(&ws_url, &account, &tx, &mut attempt).await {
                Ok(StreamEnd::Unsubscribed) => {
                    debug!("Activity subscription for {} closed", account);
                    return;
                }
                Ok(StreamEnd::Disconnected) => {
                    warn!("⚠️ Activity stream for {} disconnected", account);
                }
                Err(e) => {
                    warn!("⚠️ Activity subscription for {} failed: {}", account, e);
                }
            }

            if tx.is_closed() {
                return;
            }

            let delay = reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream_once(
        ws_url: &str,
        account: &Pubkey,
        tx: &mpsc::Sender<u64>,
        attempt: &mut u32,
    ) -> Result<StreamEnd, String> {
        let client = PubsubClient::new(ws_url).await.map_err(|e| e.to_string())?;
        let (mut stream, unsubscribe) = client
            .account_subscribe(account, None)
            .await
            .map_err(|e| e.to_string())?;

        info!("📡 Subscribed to account changes on {}", account);
        *attempt = 0;

        let end = loop {
            tokio::select! {
                _ = tx.closed() => break StreamEnd::Unsubscribed,
                update = stream.next() => match update {
                    Some(response) => {
                        // A full buffer means a discovery pass is already pending
                        if let Err(mpsc::error::TrySendError::Closed(_)) =
                            tx.try_send(response.context.slot)
                        {
                            break StreamEnd::Unsubscribed;
                        }
                    }
                    None => break StreamEnd::Disconnected,
                },
            }
        };

        drop(stream);
        unsubscribe().await;
        Ok(end)
    }
}

#[async_trait]
impl ActivityFeed for SolanaActivityFeed {
    async fn subscribe(&self, source: &str) -> Result<ActivitySubscription, ChainError> {
        let account =
            Pubkey::from_str(source).map_err(|_| ChainError::InvalidAddress(source.to_string()))?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let task = tokio::spawn(Self::run(self.ws_url.clone(), account, tx));

        Ok(ActivitySubscription::new(rx, Some(task)))
    }
}

/// Exponential backoff with up to 25% jitter
fn reconnect_delay(attempt: u32) -> Duration {
    let base = RECONNECT_BASE
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(RECONNECT_MAX);
    let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter_ms)
}

/// Pubsub endpoint for an RPC endpoint (`https://` → `wss://`)
pub fn derive_ws_url(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        rpc_url.to_string()
    }
}
