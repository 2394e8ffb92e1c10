//! Application configuration.

use crate::error::{AppError, AppResult};
use pmm_core::{MarketId, MarketSpec, Size};
use pmm_guard::GuardConfig;
use pmm_hedger::HedgerConfig;
use pmm_maker::MakerConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One configured market. Metadata is immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEntry {
    /// Exchange market key (e.g. "market:2").
    pub key: String,
    pub price_scale: u32,
    pub size_scale: u32,
    pub exchange_min_size: Decimal,
    pub exchange_min_notional: Decimal,
}

impl MarketEntry {
    pub fn market_id(&self) -> MarketId {
        MarketId::from(self.key.as_str())
    }

    pub fn spec(&self) -> MarketSpec {
        MarketSpec::new(
            self.price_scale,
            self.size_scale,
            Size::new(self.exchange_min_size),
            self.exchange_min_notional,
        )
    }
}

/// Stream endpoints and feed tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub market_url: String,
    pub account_url: String,
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    #[serde(default = "default_synthetic_threshold_ms")]
    pub synthetic_threshold_ms: u64,
    #[serde(default = "default_synthetic_interval_ms")]
    pub synthetic_interval_ms: u64,
    #[serde(default = "default_reconcile_cooldown_ms")]
    pub reconcile_cooldown_ms: u64,
    #[serde(default = "default_buffer_deadline_ms")]
    pub buffer_deadline_ms: u64,
}

fn default_keepalive_ms() -> u64 {
    20_000
}
fn default_synthetic_threshold_ms() -> u64 {
    30_000
}
fn default_synthetic_interval_ms() -> u64 {
    1_000
}
fn default_reconcile_cooldown_ms() -> u64 {
    30_000
}
fn default_buffer_deadline_ms() -> u64 {
    60_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            market_url: String::new(),
            account_url: String::new(),
            keepalive_ms: default_keepalive_ms(),
            synthetic_threshold_ms: default_synthetic_threshold_ms(),
            synthetic_interval_ms: default_synthetic_interval_ms(),
            reconcile_cooldown_ms: default_reconcile_cooldown_ms(),
            buffer_deadline_ms: default_buffer_deadline_ms(),
        }
    }
}

/// Fill ledger storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_ledger_path() -> String {
    "data/fills.jsonl".to_string()
}
fn default_archive_dir() -> String {
    "data/archive".to_string()
}
fn default_max_bytes() -> u64 {
    64 << 20
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            archive_dir: default_archive_dir(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Paper-trade (ack orders locally) instead of routing to a venue.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub markets: Vec<MarketEntry>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub maker: MakerConfig,
    #[serde(default)]
    pub hedger: HedgerConfig,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            markets: Vec::new(),
            feed: FeedConfig::default(),
            ledger: LedgerConfig::default(),
            guard: GuardConfig::default(),
            maker: MakerConfig::default(),
            hedger: HedgerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read {path}: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `PMM_CONFIG` or the default path, falling back to
    /// defaults when no file exists.
    pub fn load() -> AppResult<Self> {
        let path =
            std::env::var("PMM_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        if Path::new(&path).exists() {
            Self::from_file(&path)
        } else {
            tracing::warn!(path = %path, "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Startup validation; unresolvable configuration is fatal.
    pub fn validate(&self) -> AppResult<()> {
        if self.markets.is_empty() {
            return Err(AppError::Config("no markets configured".to_string()));
        }
        for market in &self.markets {
            if market.price_scale == 0 || market.size_scale == 0 {
                return Err(AppError::Config(format!(
                    "market {} has a zero wire scale",
                    market.key
                )));
            }
        }
        if !self.dry_run {
            return Err(AppError::Config(
                "live trading requires an exchange transport; this build is paper-only"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_toml() -> &'static str {
        r#"
            dry_run = true

            [[markets]]
            key = "market:2"
            price_scale = 100
            size_scale = 10000
            exchange_min_size = "0.061"
            exchange_min_notional = "10.5"

            [feed]
            market_url = "wss://example.invalid/market"
            account_url = "wss://example.invalid/account"

            [maker]
            base_spread_bps = "10"
            [maker.trend]
            enabled = true

            [hedger]
            enabled = true
            trigger_units = "0.008"
            target_units = "0.0005"
        "#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.markets.len(), 1);
        let spec = config.markets[0].spec();
        assert_eq!(spec.tick_size().inner(), dec!(0.01));
        assert_eq!(spec.exchange_min_size.inner(), dec!(0.061));
        assert!(config.maker.trend.enabled);
        assert_eq!(config.hedger.trigger_units, dec!(0.008));
    }

    #[test]
    fn test_no_markets_is_fatal() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_live_mode_rejected_without_transport() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.dry_run = false;
        assert!(config.validate().is_err());
    }
}
