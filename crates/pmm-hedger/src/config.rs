//! Hedger configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Hedger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// |inventory| beyond this triggers hedging.
    #[serde(default = "default_trigger_units")]
    pub trigger_units: Decimal,

    /// Alternative trigger in quote currency.
    #[serde(default)]
    pub trigger_notional: Option<Decimal>,

    /// Inventory the hedger drives toward.
    #[serde(default)]
    pub target_units: Decimal,

    /// Largest single clip.
    #[serde(default = "default_max_clip_units")]
    pub max_clip_units: Decimal,

    /// Passive leg: rest this far on the favorable side of mid.
    #[serde(default = "default_passive_offset_bps")]
    pub passive_offset_bps: Decimal,

    /// How long the passive leg may wait for a fill.
    #[serde(default = "default_passive_wait_ms")]
    pub passive_wait_ms: u64,

    /// Fill-poll cadence during the passive wait.
    #[serde(default = "default_passive_poll_ms")]
    pub passive_poll_ms: u64,

    /// Aggressive leg: cross the book by this much.
    #[serde(default = "default_aggressive_offset_bps")]
    pub aggressive_offset_bps: Decimal,

    /// Hard cap on the aggressive cross.
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: Decimal,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Evaluation cadence while idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Submit retry policy.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Clip cut while the PnL guard is active.
    #[serde(default = "default_guard_clip_multiplier")]
    pub guard_clip_multiplier: Decimal,

    /// Maker blocked longer than this escalates to emergency-flatten.
    #[serde(default = "default_emergency_block_ms")]
    pub emergency_block_ms: u64,

    #[serde(default = "default_emergency_clip_multiplier")]
    pub emergency_clip_multiplier: Decimal,

    /// Extra cross on the emergency leg.
    #[serde(default = "default_emergency_extra_bps")]
    pub emergency_extra_bps: Decimal,

    #[serde(default = "default_emergency_cooldown_ms")]
    pub emergency_cooldown_ms: u64,
}

fn default_trigger_units() -> Decimal {
    rust_decimal_macros::dec!(0.05)
}
fn default_max_clip_units() -> Decimal {
    rust_decimal_macros::dec!(0.05)
}
fn default_passive_offset_bps() -> Decimal {
    rust_decimal_macros::dec!(2)
}
fn default_passive_wait_ms() -> u64 {
    1_000
}
fn default_passive_poll_ms() -> u64 {
    300
}
fn default_aggressive_offset_bps() -> Decimal {
    rust_decimal_macros::dec!(8)
}
fn default_max_slippage_bps() -> Decimal {
    rust_decimal_macros::dec!(12)
}
fn default_cooldown_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    1_500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2_000
}
fn default_guard_clip_multiplier() -> Decimal {
    rust_decimal_macros::dec!(0.75)
}
fn default_emergency_block_ms() -> u64 {
    8_000
}
fn default_emergency_clip_multiplier() -> Decimal {
    rust_decimal_macros::dec!(1.2)
}
fn default_emergency_extra_bps() -> Decimal {
    rust_decimal_macros::dec!(4)
}
fn default_emergency_cooldown_ms() -> u64 {
    1_000
}

impl Default for HedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_units: default_trigger_units(),
            trigger_notional: None,
            target_units: Decimal::ZERO,
            max_clip_units: default_max_clip_units(),
            passive_offset_bps: default_passive_offset_bps(),
            passive_wait_ms: default_passive_wait_ms(),
            passive_poll_ms: default_passive_poll_ms(),
            aggressive_offset_bps: default_aggressive_offset_bps(),
            max_slippage_bps: default_max_slippage_bps(),
            cooldown_ms: default_cooldown_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            guard_clip_multiplier: default_guard_clip_multiplier(),
            emergency_block_ms: default_emergency_block_ms(),
            emergency_clip_multiplier: default_emergency_clip_multiplier(),
            emergency_extra_bps: default_emergency_extra_bps(),
            emergency_cooldown_ms: default_emergency_cooldown_ms(),
        }
    }
}
