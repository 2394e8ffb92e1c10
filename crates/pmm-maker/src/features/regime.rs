//! Regime switcher.
//!
//! Coarse aggressive/defensive selector over the trend and volatility
//! signals. Defensive while the PnL guard is active, a downtrend
//! cooldown is running, or volatility sits below the threshold;
//! aggressive otherwise. Switches respect a minimum dwell time. Each
//! profile bundles a size multiplier, an extra spread, and the
//! downtrend cooldown handed to the trend filter.

use super::{Adjustment, Feature, FeatureSignals, QuoteContext, StateChange};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

/// One parameter bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeProfile {
    #[serde(default = "default_size_multiplier")]
    pub size_multiplier: Decimal,
    #[serde(default)]
    pub extra_spread_bps: Decimal,
    #[serde(default = "default_down_cooldown_ms")]
    pub down_cooldown_ms: u64,
}

fn default_size_multiplier() -> Decimal {
    Decimal::ONE
}
fn default_down_cooldown_ms() -> u64 {
    45_000
}

/// Regime switcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimesConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Minimum time between switches.
    #[serde(default = "default_min_dwell_ms")]
    pub min_dwell_ms: u64,
    /// Volatility below this selects defensive.
    #[serde(default = "default_vol_threshold_bps")]
    pub vol_threshold_bps: Decimal,
    #[serde(default = "default_aggressive")]
    pub aggressive: RegimeProfile,
    #[serde(default = "default_defensive")]
    pub defensive: RegimeProfile,
}

fn default_min_dwell_ms() -> u64 {
    60_000
}
fn default_vol_threshold_bps() -> Decimal {
    rust_decimal_macros::dec!(8)
}
fn default_aggressive() -> RegimeProfile {
    RegimeProfile {
        size_multiplier: rust_decimal_macros::dec!(1.0),
        extra_spread_bps: Decimal::ZERO,
        down_cooldown_ms: 18_000,
    }
}
fn default_defensive() -> RegimeProfile {
    RegimeProfile {
        size_multiplier: rust_decimal_macros::dec!(0.7),
        extra_spread_bps: rust_decimal_macros::dec!(2),
        down_cooldown_ms: 45_000,
    }
}

impl Default for RegimesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_dwell_ms: default_min_dwell_ms(),
            vol_threshold_bps: default_vol_threshold_bps(),
            aggressive: default_aggressive(),
            defensive: default_defensive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Regime {
    Aggressive,
    Defensive,
}

/// Regime switcher feature.
pub struct RegimeSwitcher {
    config: RegimesConfig,
    current: Regime,
    last_switch: Option<Instant>,
    inputs: FeatureSignals,
}

impl RegimeSwitcher {
    pub fn new(config: RegimesConfig) -> Self {
        Self {
            config,
            // Start defensive; earn aggression.
            current: Regime::Defensive,
            last_switch: None,
            inputs: FeatureSignals::default(),
        }
    }

    fn profile(&self) -> &RegimeProfile {
        match self.current {
            Regime::Aggressive => &self.config.aggressive,
            Regime::Defensive => &self.config.defensive,
        }
    }

    fn target(&self) -> Regime {
        let low_vol = self
            .inputs
            .volatility_bps
            .is_some_and(|vol| vol < self.config.vol_threshold_bps);
        if self.inputs.pnl_guard_active || self.inputs.trend_down || low_vol {
            Regime::Defensive
        } else {
            Regime::Aggressive
        }
    }

    fn maybe_switch(&mut self, now: Instant) {
        let target = self.target();
        if target == self.current {
            return;
        }
        let dwell_ok = self.last_switch.map_or(true, |at| {
            now.duration_since(at) >= Duration::from_millis(self.config.min_dwell_ms)
        });
        if !dwell_ok {
            return;
        }
        self.current = target;
        self.last_switch = Some(now);
        let profile = self.profile();
        info!(
            regime = ?self.current,
            size_multiplier = %profile.size_multiplier,
            extra_spread_bps = %profile.extra_spread_bps,
            "regime switch"
        );
    }
}

impl Feature for RegimeSwitcher {
    fn name(&self) -> &'static str {
        "regime"
    }

    fn update(&mut self, change: &StateChange) {
        if let StateChange::Signals(signals) = change {
            self.inputs = FeatureSignals {
                // Do not echo our own cooldown back into the inputs.
                down_cooldown: None,
                ..signals.clone()
            };
        }
    }

    fn adjust(&mut self, ctx: &QuoteContext) -> Adjustment {
        self.maybe_switch(ctx.now);
        let profile = self.profile();
        let mut adjustment = Adjustment {
            spread_delta_bps: profile.extra_spread_bps,
            size_multiplier: profile.size_multiplier,
            ..Default::default()
        };
        adjustment.signals.down_cooldown =
            Some(Duration::from_millis(profile.down_cooldown_ms));
        adjustment
    }
}
