use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::{str::FromStr, sync::Arc};
use tracing::{info, warn};

use crate::{
    chain::{
        pubsub::SolanaActivityFeed,
        solana::{SolanaConfig, SolanaLedgerClient},
        throttle::RpcThrottle,
        ActivityFeed, LedgerClient, TimeoutLedger,
    },
    config::{load_watch_list, Config},
    daemon::{Daemon, DaemonSettings},
    error::{AppError, AppResult},
    risk::BreakerConfig,
    settlement::ScheduleConfig,
    watcher::WatcherSettings,
};

/// Wire the Solana adapters and start the daemon
pub async fn start_daemon(config: &Config) -> AppResult<Daemon> {
    info!("Initializing daemon components ...");

    let program_id = Pubkey::from_str(&config.program_id)
        .map_err(|_| AppError::Config(format!("Invalid program id: {}", config.program_id)))?;
    let signer = load_signer(config.keypair_path.as_deref())?;

    let throttle = RpcThrottle::new(config.rpc_requests_per_second);
    let solana = SolanaLedgerClient::new(
        SolanaConfig {
            rpc_url: config.rpc_url.clone(),
            program_id,
            ..SolanaConfig::default()
        },
        throttle,
        signer,
    );
    info!(
        "✅ RPC client for {} ({} req/s, {:?} timeout)",
        config.rpc_url,
        config.rpc_requests_per_second,
        config.rpc_timeout()
    );

    let client: Arc<dyn LedgerClient> =
        Arc::new(TimeoutLedger::new(Arc::new(solana), config.rpc_timeout()));
    let feed: Arc<dyn ActivityFeed> = Arc::new(SolanaActivityFeed::new(config.ws_url()));

    let watches = load_watch_list(&config.tokens_file)?;
    info!(
        "✅ Loaded {} entities from {}",
        watches.len(),
        config.tokens_file
    );

    Daemon::start(watches, client, feed, daemon_settings(config)).await
}

pub fn daemon_settings(config: &Config) -> DaemonSettings {
    DaemonSettings {
        max_window: config.max_window,
        schedule: ScheduleConfig {
            flush_interval: config.flush_interval(),
            adaptive_check_interval: config.adaptive_check_interval(),
            adaptive_threshold: config.adaptive_threshold(),
        },
        watcher: WatcherSettings {
            recent_activity_limit: config.recent_activity_limit,
            poll_interval: config.poll_interval(),
            rescan_on_start: config.rescan_on_start,
            breaker: BreakerConfig {
                max_consecutive_failures: config.max_consecutive_failures,
                cooldown: config.breaker_cooldown(),
            },
        },
        extractor: config.extractor_config(),
        shutdown_timeout: config.shutdown_timeout(),
    }
}

/// Settlement signer from a JSON byte-array keypair file (Solana CLI format).
/// Without one the daemon still attributes fees but every settlement is
/// rejected.
fn load_signer(path: Option<&str>) -> AppResult<Option<Keypair>> {
    let Some(path) = path else {
        warn!("⚠️  No keypair configured - settlement disabled, attribution only");
        return Ok(None);
    };

    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("Cannot read keypair {}: {}", path, e)))?;
    let keypair = parse_keypair(&raw)?;
    info!("✅ Settlement signer {}", keypair.pubkey());
    Ok(Some(keypair))
}

fn parse_keypair(raw: &str) -> AppResult<Keypair> {
    let bytes: Vec<u8> = serde_json::from_str(raw)?;
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| AppError::Config(format!("Invalid keypair bytes: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keypair_round_trips_cli_format() {
        let keypair = Keypair::new();
        let raw = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();

        let parsed = parse_keypair(&raw).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_parse_keypair_rejects_garbage() {
        assert!(parse_keypair("[1, 2, 3]").is_err());
        assert!(parse_keypair("not json").is_err());
    }

    #[test]
    fn test_daemon_settings_follow_config() {
        let config = Config {
            max_window: 500,
            adaptive_threshold_pct: 50,
            max_consecutive_failures: 0,
            ..Config::default()
        };
        let settings = daemon_settings(&config);
        assert_eq!(settings.max_window, 500);
        assert_eq!(settings.schedule.adaptive_threshold, 250);
        assert_eq!(settings.watcher.breaker.max_consecutive_failures, 0);
        assert_eq!(settings.extractor.min_plausible_fee, 100_000);
    }
}
