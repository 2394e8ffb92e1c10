//! Inventory adjustments.
//!
//! Discourages adding to existing exposure: tiered spread widening and
//! size cuts as |inventory| grows, and above the asymmetric threshold
//! an outright gate on the side that would add to the position. The
//! maker works with the hedger instead of against it.

use super::{Adjustment, Feature, QuoteContext, SideGates, StateChange};
use pmm_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Inventory adjustment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Tier thresholds in base units.
    #[serde(default = "default_threshold_low")]
    pub threshold_low: Decimal,
    #[serde(default = "default_threshold_med")]
    pub threshold_med: Decimal,
    #[serde(default = "default_threshold_high")]
    pub threshold_high: Decimal,
    #[serde(default = "default_spread_low")]
    pub spread_bps_low: Decimal,
    #[serde(default = "default_spread_med")]
    pub spread_bps_med: Decimal,
    #[serde(default = "default_spread_high")]
    pub spread_bps_high: Decimal,
    #[serde(default = "default_size_mult_low")]
    pub size_mult_low: Decimal,
    #[serde(default = "default_size_mult_med")]
    pub size_mult_med: Decimal,
    /// |inventory| above this gates the side that adds to exposure.
    #[serde(default = "default_asym_threshold")]
    pub asym_threshold: Decimal,
}

fn default_threshold_low() -> Decimal {
    rust_decimal_macros::dec!(0.01)
}
fn default_threshold_med() -> Decimal {
    rust_decimal_macros::dec!(0.02)
}
fn default_threshold_high() -> Decimal {
    rust_decimal_macros::dec!(0.03)
}
fn default_spread_low() -> Decimal {
    rust_decimal_macros::dec!(2)
}
fn default_spread_med() -> Decimal {
    rust_decimal_macros::dec!(4)
}
fn default_spread_high() -> Decimal {
    rust_decimal_macros::dec!(6)
}
fn default_size_mult_low() -> Decimal {
    rust_decimal_macros::dec!(0.75)
}
fn default_size_mult_med() -> Decimal {
    rust_decimal_macros::dec!(0.5)
}
fn default_asym_threshold() -> Decimal {
    rust_decimal_macros::dec!(0.01)
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_low: default_threshold_low(),
            threshold_med: default_threshold_med(),
            threshold_high: default_threshold_high(),
            spread_bps_low: default_spread_low(),
            spread_bps_med: default_spread_med(),
            spread_bps_high: default_spread_high(),
            size_mult_low: default_size_mult_low(),
            size_mult_med: default_size_mult_med(),
            asym_threshold: default_asym_threshold(),
        }
    }
}

/// Inventory adjustment feature.
pub struct InventoryAdjust {
    config: InventoryConfig,
}

impl InventoryAdjust {
    pub fn new(config: InventoryConfig) -> Self {
        Self { config }
    }
}

impl Feature for InventoryAdjust {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn update(&mut self, _change: &StateChange) {}

    fn adjust(&mut self, ctx: &QuoteContext) -> Adjustment {
        let abs = ctx.inventory.abs().inner();

        let spread_delta_bps = if abs > self.config.threshold_high {
            self.config.spread_bps_high
        } else if abs > self.config.threshold_med {
            self.config.spread_bps_med
        } else if abs > self.config.threshold_low {
            self.config.spread_bps_low
        } else {
            Decimal::ZERO
        };

        let size_multiplier = if abs > self.config.threshold_med {
            self.config.size_mult_med
        } else if abs > self.config.threshold_low {
            self.config.size_mult_low
        } else {
            Decimal::ONE
        };

        // Gate the accumulating side; keep quoting the flattening side.
        let gates = if abs > self.config.asym_threshold {
            SideGates::only(Side::flattening(ctx.inventory).opposite())
        } else {
            SideGates::none()
        };

        Adjustment {
            spread_delta_bps,
            size_multiplier,
            gates,
            ..Default::default()
        }
    }
}
