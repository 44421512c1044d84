use serde::Deserialize;
use std::{path::Path, time::Duration};
use tracing::{error, warn};

use crate::{
    attribution::ExtractorConfig,
    error::{AppError, AppResult},
};

/// One watched entity, loaded at startup and never mutated
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityWatch {
    /// Opaque entity identifier (token mint)
    #[serde(alias = "mint")]
    pub entity_id: String,
    /// Account whose state changes signal new activity (bonding curve)
    #[serde(alias = "bondingCurve")]
    pub activity_source: String,
    /// Account fees are paid into (creator vault)
    #[serde(alias = "creatorVault")]
    pub fee_source: String,
    /// Human readable symbol
    #[serde(alias = "symbol")]
    pub label: String,
}

impl EntityWatch {
    pub fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("entityId", &self.entity_id),
            ("activitySource", &self.activity_source),
            ("feeSource", &self.fee_source),
            ("label", &self.label),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("watch entry is missing {}", field)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub program_id: String,
    pub keypair_path: Option<String>,
    pub tokens_file: String,
    pub max_window: u64,
    pub adaptive_threshold_pct: u64,
    pub flush_interval_secs: u64,
    pub adaptive_check_secs: u64,
    pub poll_interval_secs: u64,
    pub recent_activity_limit: usize,
    pub rpc_timeout_secs: u64,
    pub rpc_requests_per_second: u32,
    pub min_plausible_fee: u64,
    pub max_plausible_fee: u64,
    pub fee_markers: Vec<String>,
    pub max_consecutive_failures: u32,
    pub breaker_cooldown_secs: u64,
    pub rescan_on_start: bool,
    pub status_bind_address: Option<String>,
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: None,
            program_id: "ASDfNfUHwVGfrg3SV7SQYWhaVxnrCUZyWmMpWJAPu4MZ".to_string(),
            keypair_path: None,
            tokens_file: "tokens.json".to_string(),
            max_window: 1000,
            adaptive_threshold_pct: 80,
            flush_interval_secs: 30,
            adaptive_check_secs: 5,
            poll_interval_secs: 15,
            recent_activity_limit: 20,
            rpc_timeout_secs: 10,
            rpc_requests_per_second: 10,
            min_plausible_fee: 100_000,
            max_plausible_fee: 10_000_000_000,
            fee_markers: ExtractorConfig::default().markers,
            max_consecutive_failures: 5,
            breaker_cooldown_secs: 300,
            rescan_on_start: false,
            status_bind_address: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Defaults, then an optional `fee-daemon.{toml,json,yaml}` file (or the
    /// file named by `FEE_DAEMON_CONFIG`), then `FEE_DAEMON_*` variables.
    pub fn load() -> AppResult<Self> {
        let file = std::env::var("FEE_DAEMON_CONFIG").unwrap_or_else(|_| "fee-daemon".to_string());

        let config: Config = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("FEE_DAEMON")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("fee_markers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_window == 0 {
            return Err(AppError::Config("max_window must be positive".into()));
        }
        if self.adaptive_threshold_pct == 0 || self.adaptive_threshold_pct > 100 {
            return Err(AppError::Config(
                "adaptive_threshold_pct must be within 1..=100".into(),
            ));
        }
        if self.min_plausible_fee >= self.max_plausible_fee {
            return Err(AppError::Config(
                "min_plausible_fee must be below max_plausible_fee".into(),
            ));
        }
        if self.flush_interval_secs == 0
            || self.adaptive_check_secs == 0
            || self.poll_interval_secs == 0
            || self.rpc_timeout_secs == 0
        {
            return Err(AppError::Config("intervals and timeouts must be non-zero".into()));
        }
        if self.recent_activity_limit == 0 {
            return Err(AppError::Config("recent_activity_limit must be positive".into()));
        }
        Ok(())
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| crate::chain::pubsub::derive_ws_url(&self.rpc_url))
    }

    /// Slot delta at which a settlement is triggered ahead of the fixed timer
    pub fn adaptive_threshold(&self) -> u64 {
        self.max_window.saturating_mul(self.adaptive_threshold_pct) / 100
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            markers: self.fee_markers.clone(),
            min_plausible_fee: self.min_plausible_fee,
            max_plausible_fee: self.max_plausible_fee,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn adaptive_check_interval(&self) -> Duration {
        Duration::from_secs(self.adaptive_check_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Load the watch list. Malformed entries are logged and skipped so one bad
/// token never keeps the others from starting.
pub fn load_watch_list(path: impl AsRef<Path>) -> AppResult<Vec<EntityWatch>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!("Cannot read tokens file {}: {}", path.display(), e))
    })?;
    parse_watch_list(&raw)
}

pub fn parse_watch_list(raw: &str) -> AppResult<Vec<EntityWatch>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let mut watches: Vec<EntityWatch> = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let watch = match serde_json::from_value::<EntityWatch>(entry) {
            Ok(watch) => watch,
            Err(e) => {
                error!("❌ Skipping watch entry #{}: {}", index, e);
                continue;
            }
        };

        if let Err(e) = watch.validate() {
            error!("❌ Skipping watch entry #{} ({}): {}", index, watch.label, e);
            continue;
        }

        if watches.iter().any(|w| w.entity_id == watch.entity_id) {
            warn!("⚠️ Duplicate watch entry for {} ignored", watch.entity_id);
            continue;
        }

        watches.push(watch);
    }

    Ok(watches)
}
