//! Pluggable quote adjustments.
//!
//! Each feature is a transformer over a shared read-only context:
//! it contributes a spread delta in bps, a size multiplier, and a set
//! of side gates. Contributions compose additively (spread),
//! multiplicatively (size), and by union (gates); evaluation order does
//! not matter semantically.

mod inventory;
mod pnl_guard;
mod regime;
mod trend;
mod volatility;

pub use inventory::{InventoryAdjust, InventoryConfig};
pub use pnl_guard::{PnlGuard, PnlGuardConfig, ReleasePolicy};
pub use regime::{RegimeProfile, RegimeSwitcher, RegimesConfig};
pub use trend::{TrendConfig, TrendFilter};
pub use volatility::{VolatilityBand, VolatilityConfig};

use pmm_core::{Price, Side, Size};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};

/// Which sides a feature disables this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideGates {
    pub bid: bool,
    pub ask: bool,
}

impl SideGates {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn both() -> Self {
        Self {
            bid: true,
            ask: true,
        }
    }

    pub fn only(side: Side) -> Self {
        match side {
            Side::Bid => Self {
                bid: true,
                ask: false,
            },
            Side::Ask => Self {
                bid: false,
                ask: true,
            },
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            bid: self.bid || other.bid,
            ask: self.ask || other.ask,
        }
    }

    pub fn gated(&self, side: Side) -> bool {
        match side {
            Side::Bid => self.bid,
            Side::Ask => self.ask,
        }
    }
}

/// Cross-feature signals, reported by each feature in its adjustment
/// and broadcast back to all features after the cycle (one-cycle lag).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSignals {
    pub volatility_bps: Option<Decimal>,
    pub trend_down: bool,
    pub pnl_guard_active: bool,
    /// Downtrend cooldown selected by the active regime profile.
    pub down_cooldown: Option<Duration>,
}

impl FeatureSignals {
    pub fn merge(mut self, other: &FeatureSignals) -> Self {
        if other.volatility_bps.is_some() {
            self.volatility_bps = other.volatility_bps;
        }
        self.trend_down |= other.trend_down;
        self.pnl_guard_active |= other.pnl_guard_active;
        if other.down_cooldown.is_some() {
            self.down_cooldown = other.down_cooldown;
        }
        self
    }
}

/// One feature's contribution for a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub spread_delta_bps: Decimal,
    pub size_multiplier: Decimal,
    pub gates: SideGates,
    pub signals: FeatureSignals,
}

impl Default for Adjustment {
    fn default() -> Self {
        Self {
            spread_delta_bps: Decimal::ZERO,
            size_multiplier: Decimal::ONE,
            gates: SideGates::none(),
            signals: FeatureSignals::default(),
        }
    }
}

/// State deltas fed into features between cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Mid { mid: Price, at: Instant },
    Fill { side: Side, size: Size },
    /// Rolling-window realized PnL from the compositor.
    WindowedPnl { realized: Decimal },
    /// Merged cross-feature signals from the previous cycle.
    Signals(FeatureSignals),
}

/// Read-only context for a quote cycle.
#[derive(Debug, Clone)]
pub struct QuoteContext {
    pub mid: Price,
    pub inventory: Size,
    pub inventory_soft_cap: Size,
    pub base_spread_bps: Decimal,
    pub now: Instant,
}

/// A pluggable quote adjustment.
pub trait Feature: Send {
    fn name(&self) -> &'static str;

    /// Ingest a state delta.
    fn update(&mut self, change: &StateChange);

    /// Contribution for this cycle. May advance internal state
    /// machines (pause latches, cooldowns).
    fn adjust(&mut self, ctx: &QuoteContext) -> Adjustment;
}

/// Build the enabled feature chain in canonical evaluation order.
/// Order only matters for logging; contributions compose the same way
/// regardless.
pub fn build(config: &crate::MakerConfig) -> Vec<Box<dyn Feature>> {
    let mut features: Vec<Box<dyn Feature>> = Vec::new();
    if config.trend.enabled {
        features.push(Box::new(TrendFilter::new(config.trend.clone())));
    }
    if config.volatility.enabled {
        features.push(Box::new(VolatilityBand::new(config.volatility.clone())));
    }
    if config.inventory.enabled {
        features.push(Box::new(InventoryAdjust::new(config.inventory.clone())));
    }
    if config.pnl_guard.enabled {
        features.push(Box::new(PnlGuard::new(config.pnl_guard.clone())));
    }
    if config.regimes.enabled {
        features.push(Box::new(RegimeSwitcher::new(config.regimes.clone())));
    }
    features
}

/// Compose adjustments: sum spreads, multiply sizes, union gates,
/// merge signals.
pub fn compose(adjustments: &[Adjustment]) -> Adjustment {
    adjustments.iter().fold(
        Adjustment::default(),
        |mut acc, a| {
            acc.spread_delta_bps += a.spread_delta_bps;
            acc.size_multiplier *= a.size_multiplier;
            acc.gates = acc.gates.union(a.gates);
            acc.signals = acc.signals.merge(&a.signals);
            acc
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_compose_sums_and_multiplies() {
        let a = Adjustment {
            spread_delta_bps: dec!(2),
            size_multiplier: dec!(0.5),
            gates: SideGates::only(Side::Bid),
            ..Default::default()
        };
        let b = Adjustment {
            spread_delta_bps: dec!(3),
            size_multiplier: dec!(0.8),
            gates: SideGates::only(Side::Ask),
            ..Default::default()
        };

        let composed = compose(&[a, b]);
        assert_eq!(composed.spread_delta_bps, dec!(5));
        assert_eq!(composed.size_multiplier, dec!(0.4));
        // Opposing gates union: neither side quotes this cycle.
        assert!(composed.gates.bid && composed.gates.ask);
    }

    #[test]
    fn test_compose_empty_is_identity() {
        let composed = compose(&[]);
        assert_eq!(composed.spread_delta_bps, dec!(0));
        assert_eq!(composed.size_multiplier, dec!(1));
        assert_eq!(composed.gates, SideGates::none());
    }
}
