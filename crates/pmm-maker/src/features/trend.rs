//! Trend filter.
//!
//! Penalizes quoting on the side price is running away from: a down
//! move beyond the threshold gates the bid (and widens), an up move
//! gates the ask. The gated state releases through a hysteresis band,
//! and down moves additionally start a cooldown during which the bid
//! stays gated. A gate is suppressed when it would stop the maker from
//! reducing oversized exposure.

use super::{Adjustment, Feature, QuoteContext, SideGates, StateChange};
use pmm_core::{Price, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

/// Trend filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Mid history window.
    #[serde(default = "default_lookback_ms")]
    pub lookback_ms: u64,
    /// Up move (bps over lookback) that gates the ask.
    #[serde(default = "default_threshold_bps")]
    pub up_threshold_bps: Decimal,
    /// Down move (bps, positive number) that gates the bid.
    #[serde(default = "default_threshold_bps")]
    pub down_threshold_bps: Decimal,
    /// Move must retrace inside this band before the gate releases.
    #[serde(default = "default_hysteresis_bps")]
    pub hysteresis_bps: Decimal,
    #[serde(default = "default_extra_spread_bps")]
    pub extra_spread_bps: Decimal,
    #[serde(default = "default_down_extra_spread_bps")]
    pub down_extra_spread_bps: Decimal,
    /// Bid stays gated this long after a down trigger.
    #[serde(default = "default_down_cooldown_ms")]
    pub down_cooldown_ms: u64,
    /// Gate is suppressed when |inventory| exceeds this fraction of the
    /// soft cap and the gated side is the flattening side.
    #[serde(default = "default_inventory_ratio")]
    pub inventory_ratio: Decimal,
}

fn default_lookback_ms() -> u64 {
    45_000
}
fn default_threshold_bps() -> Decimal {
    rust_decimal_macros::dec!(15)
}
fn default_hysteresis_bps() -> Decimal {
    rust_decimal_macros::dec!(8)
}
fn default_extra_spread_bps() -> Decimal {
    rust_decimal_macros::dec!(3)
}
fn default_down_extra_spread_bps() -> Decimal {
    rust_decimal_macros::dec!(3)
}
fn default_down_cooldown_ms() -> u64 {
    45_000
}
fn default_inventory_ratio() -> Decimal {
    rust_decimal_macros::dec!(0.7)
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lookback_ms: default_lookback_ms(),
            up_threshold_bps: default_threshold_bps(),
            down_threshold_bps: default_threshold_bps(),
            hysteresis_bps: default_hysteresis_bps(),
            extra_spread_bps: default_extra_spread_bps(),
            down_extra_spread_bps: default_down_extra_spread_bps(),
            down_cooldown_ms: default_down_cooldown_ms(),
            inventory_ratio: default_inventory_ratio(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrendState {
    Neutral,
    /// Up move: ask gated.
    GateAsk,
    /// Down move: bid gated.
    GateBid,
}

/// Trend filter feature.
pub struct TrendFilter {
    config: TrendConfig,
    samples: VecDeque<(Instant, Price)>,
    state: TrendState,
    cooldown_until: Option<Instant>,
    /// Cooldown override from the active regime profile.
    cooldown_override: Option<Duration>,
}

impl TrendFilter {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            samples: VecDeque::with_capacity(256),
            state: TrendState::Neutral,
            cooldown_until: None,
            cooldown_override: None,
        }
    }

    fn lookback(&self) -> Duration {
        Duration::from_millis(self.config.lookback_ms)
    }

    fn down_cooldown(&self) -> Duration {
        self.cooldown_override
            .unwrap_or(Duration::from_millis(self.config.down_cooldown_ms))
    }

    fn delta_bps(&self, now: Instant) -> Option<Decimal> {
        let newest = self.samples.back()?.1;
        let oldest = self
            .samples
            .iter()
            .find(|(at, _)| now.duration_since(*at) <= self.lookback())?
            .1;
        newest.bps_from(oldest)
    }

    fn advance(&mut self, delta_bps: Decimal, now: Instant) {
        let previous = self.state;

        // Release through the hysteresis band first.
        match self.state {
            TrendState::GateAsk if delta_bps < self.config.hysteresis_bps => {
                self.state = TrendState::Neutral;
            }
            TrendState::GateBid if delta_bps > -self.config.hysteresis_bps => {
                self.state = TrendState::Neutral;
            }
            _ => {}
        }

        if self.state == TrendState::Neutral {
            if delta_bps >= self.config.up_threshold_bps {
                self.state = TrendState::GateAsk;
            } else if delta_bps <= -self.config.down_threshold_bps {
                self.state = TrendState::GateBid;
                let cooldown = self.down_cooldown();
                if !cooldown.is_zero() {
                    let until = now + cooldown;
                    self.cooldown_until = Some(
                        self.cooldown_until
                            .map_or(until, |current| current.max(until)),
                    );
                }
            }
        }

        if previous != self.state {
            info!(state = ?self.state, delta_bps = %delta_bps, "trend state change");
        }
    }

    fn cooldown_active(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// True while the down signal or its cooldown holds; feeds the
    /// regime switcher.
    pub fn is_down(&self, now: Instant) -> bool {
        self.state == TrendState::GateBid || self.cooldown_active(now)
    }
}

impl Feature for TrendFilter {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn update(&mut self, change: &StateChange) {
        match change {
            StateChange::Mid { mid, at } => {
                self.samples.push_back((*at, *mid));
                let lookback = self.lookback();
                while let Some((oldest, _)) = self.samples.front() {
                    if at.duration_since(*oldest) > lookback {
                        self.samples.pop_front();
                    } else {
                        break;
                    }
                }
            }
            StateChange::Signals(signals) => {
                self.cooldown_override = signals.down_cooldown;
            }
            _ => {}
        }
    }

    fn adjust(&mut self, ctx: &QuoteContext) -> Adjustment {
        let Some(delta_bps) = self.delta_bps(ctx.now) else {
            return Adjustment::default();
        };
        self.advance(delta_bps, ctx.now);

        let cooldown_active = self.cooldown_active(ctx.now);
        let (gate, extra) = match self.state {
            TrendState::GateAsk => (Some(Side::Ask), self.config.extra_spread_bps),
            TrendState::GateBid => (Some(Side::Bid), self.config.down_extra_spread_bps),
            TrendState::Neutral if cooldown_active => {
                (Some(Side::Bid), self.config.down_extra_spread_bps)
            }
            TrendState::Neutral => (None, Decimal::ZERO),
        };

        let mut gates = SideGates::none();
        let mut spread = Decimal::ZERO;
        if let Some(side) = gate {
            // Never gate the side that flattens oversized exposure.
            let limit = ctx.inventory_soft_cap.inner() * self.config.inventory_ratio;
            let oversized = ctx.inventory.abs().inner() > limit;
            let flattening = Side::flattening(ctx.inventory);
            if oversized && side == flattening {
                spread = extra;
            } else {
                gates = SideGates::only(side);
                spread = extra;
            }
        }

        let mut adjustment = Adjustment {
            spread_delta_bps: spread,
            gates,
            ..Default::default()
        };
        adjustment.signals.trend_down = self.is_down(ctx.now);
        adjustment
    }
}
