//! Maker configuration.

use crate::features::{
    InventoryConfig, PnlGuardConfig, RegimesConfig, TrendConfig, VolatilityConfig,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maker engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base full spread in basis points.
    #[serde(default = "default_base_spread_bps")]
    pub base_spread_bps: Decimal,

    /// Floor for the effective spread after feature contributions.
    #[serde(default = "default_min_spread_bps")]
    pub min_spread_bps: Decimal,

    /// Uniform spread jitter amplitude in bps (anti-fingerprinting).
    #[serde(default)]
    pub randomize_bps: Decimal,

    /// Baseline quote size in base units.
    #[serde(default = "default_base_size")]
    pub base_size: Decimal,

    /// Size interpolation bounds against the inventory soft cap.
    /// Default to 0.7x / 1.3x of `base_size`.
    #[serde(default)]
    pub size_min: Option<Decimal>,
    #[serde(default)]
    pub size_max: Option<Decimal>,

    /// Inventory soft cap driving size interpolation and gate ratios.
    #[serde(default = "default_inventory_soft_cap")]
    pub inventory_soft_cap: Decimal,

    /// Hard cap on a single quoted clip.
    #[serde(default = "default_max_clip_size")]
    pub max_clip_size: Decimal,

    /// Quote refresh cadence.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Refresh jitter fraction (0.1 = ±10%).
    #[serde(default = "default_refresh_jitter")]
    pub refresh_jitter: f64,

    /// Oldest mid accepted for a cycle.
    #[serde(default = "default_mid_max_age_ms")]
    pub mid_max_age_ms: u64,

    /// Sticky-quote tolerances: a resting order within these bounds of
    /// the intended quote is left alone.
    #[serde(default = "default_price_epsilon_bps")]
    pub price_epsilon_bps: Decimal,
    #[serde(default = "default_size_epsilon_ratio")]
    pub size_epsilon_ratio: Decimal,

    /// Cancel discipline window limit.
    #[serde(default = "default_max_cancels_per_minute")]
    pub max_cancels_per_minute: u32,

    /// Submit retry policy for transient errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Rolling window for the PnL guard's realized PnL input.
    #[serde(default = "default_pnl_window_ms")]
    pub pnl_window_ms: u64,

    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub volatility: VolatilityConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub pnl_guard: PnlGuardConfig,
    #[serde(default)]
    pub regimes: RegimesConfig,
}

fn default_true() -> bool {
    true
}
fn default_base_spread_bps() -> Decimal {
    rust_decimal_macros::dec!(10)
}
fn default_min_spread_bps() -> Decimal {
    rust_decimal_macros::dec!(1)
}
fn default_base_size() -> Decimal {
    rust_decimal_macros::dec!(0.001)
}
fn default_inventory_soft_cap() -> Decimal {
    rust_decimal_macros::dec!(0.1)
}
fn default_max_clip_size() -> Decimal {
    rust_decimal_macros::dec!(1)
}
fn default_refresh_interval_ms() -> u64 {
    5_000
}
fn default_refresh_jitter() -> f64 {
    0.1
}
fn default_mid_max_age_ms() -> u64 {
    10_000
}
fn default_price_epsilon_bps() -> Decimal {
    rust_decimal_macros::dec!(1)
}
fn default_size_epsilon_ratio() -> Decimal {
    rust_decimal_macros::dec!(0.05)
}
fn default_max_cancels_per_minute() -> u32 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_pnl_window_ms() -> u64 {
    300_000
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_spread_bps: default_base_spread_bps(),
            min_spread_bps: default_min_spread_bps(),
            randomize_bps: Decimal::ZERO,
            base_size: default_base_size(),
            size_min: None,
            size_max: None,
            inventory_soft_cap: default_inventory_soft_cap(),
            max_clip_size: default_max_clip_size(),
            refresh_interval_ms: default_refresh_interval_ms(),
            refresh_jitter: default_refresh_jitter(),
            mid_max_age_ms: default_mid_max_age_ms(),
            price_epsilon_bps: default_price_epsilon_bps(),
            size_epsilon_ratio: default_size_epsilon_ratio(),
            max_cancels_per_minute: default_max_cancels_per_minute(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            pnl_window_ms: default_pnl_window_ms(),
            trend: TrendConfig::default(),
            volatility: VolatilityConfig::default(),
            inventory: InventoryConfig::default(),
            pnl_guard: PnlGuardConfig::default(),
            regimes: RegimesConfig::default(),
        }
    }
}

impl MakerConfig {
    /// Lower size bound (defaults to 0.7x base, never above the upper).
    pub fn resolved_size_min(&self) -> Decimal {
        let min = self
            .size_min
            .unwrap_or(self.base_size * rust_decimal_macros::dec!(0.7));
        min.min(self.resolved_size_max_raw())
    }

    /// Upper size bound (defaults to 1.3x base).
    pub fn resolved_size_max(&self) -> Decimal {
        self.resolved_size_max_raw().max(self.resolved_size_min())
    }

    fn resolved_size_max_raw(&self) -> Decimal {
        self.size_max
            .unwrap_or(self.base_size * rust_decimal_macros::dec!(1.3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_size_bounds_default_around_base() {
        let config = MakerConfig {
            base_size: dec!(0.1),
            ..Default::default()
        };
        assert_eq!(config.resolved_size_min(), dec!(0.07));
        assert_eq!(config.resolved_size_max(), dec!(0.13));
    }

    #[test]
    fn test_swapped_bounds_are_ordered() {
        let config = MakerConfig {
            base_size: dec!(0.1),
            size_min: Some(dec!(0.2)),
            size_max: Some(dec!(0.05)),
            ..Default::default()
        };
        assert!(config.resolved_size_min() <= config.resolved_size_max());
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        let raw = r#"
            base_spread_bps = "12"
            [trend]
            enabled = true
            [pnl_guard]
            enabled = true
            [pnl_guard.release]
            mode = "recovery"
            above = "0.05"
        "#;
        let config: MakerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.base_spread_bps, dec!(12));
        assert!(config.trend.enabled);
        assert!(config.pnl_guard.enabled);
        assert!(!config.volatility.enabled);
    }
}
