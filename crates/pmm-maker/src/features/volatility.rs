//! Volatility band.
//!
//! Tracks an EMA of absolute mid change in bps and scales the spread
//! between a floor and a ceiling. Extreme volatility pauses both sides;
//! quoting resumes only once volatility has calmed AND inventory is
//! inside a fraction of the soft cap. Dead-quiet markets also pause:
//! at very low volatility the maker only bleeds hedging costs.

use super::{Adjustment, Feature, QuoteContext, SideGates, StateChange};
use pmm_core::Price;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Volatility band configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    #[serde(default)]
    pub enabled: bool,
    /// EMA half-life for absolute mid change.
    #[serde(default = "default_half_life_ms")]
    pub ema_half_life_ms: u64,
    /// Volatility mapped to the spread floor.
    #[serde(default = "default_low_bps")]
    pub low_bps: Decimal,
    /// Volatility mapped to the spread ceiling.
    #[serde(default = "default_high_bps")]
    pub high_bps: Decimal,
    #[serde(default = "default_min_spread_bps")]
    pub min_spread_bps: Decimal,
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: Decimal,
    #[serde(default = "default_min_size_multiplier")]
    pub min_size_multiplier: Decimal,
    #[serde(default = "default_max_size_multiplier")]
    pub max_size_multiplier: Decimal,
    /// Volatility above this pauses both sides.
    #[serde(default = "default_pause_threshold_bps")]
    pub pause_threshold_bps: Decimal,
    /// Resume only below this AND with inventory inside the ratio.
    #[serde(default = "default_resume_threshold_bps")]
    pub resume_threshold_bps: Decimal,
    #[serde(default = "default_resume_inventory_ratio")]
    pub resume_inventory_ratio: Decimal,
    /// Volatility below this pauses both sides (dead market).
    #[serde(default = "default_low_pause_threshold_bps")]
    pub low_pause_threshold_bps: Decimal,
    #[serde(default = "default_low_resume_threshold_bps")]
    pub low_resume_threshold_bps: Decimal,
}

fn default_half_life_ms() -> u64 {
    30_000
}
fn default_low_bps() -> Decimal {
    rust_decimal_macros::dec!(5)
}
fn default_high_bps() -> Decimal {
    rust_decimal_macros::dec!(25)
}
fn default_min_spread_bps() -> Decimal {
    rust_decimal_macros::dec!(10)
}
fn default_max_spread_bps() -> Decimal {
    rust_decimal_macros::dec!(20)
}
fn default_min_size_multiplier() -> Decimal {
    rust_decimal_macros::dec!(0.5)
}
fn default_max_size_multiplier() -> Decimal {
    rust_decimal_macros::dec!(1.0)
}
fn default_pause_threshold_bps() -> Decimal {
    rust_decimal_macros::dec!(35)
}
fn default_resume_threshold_bps() -> Decimal {
    rust_decimal_macros::dec!(25)
}
fn default_resume_inventory_ratio() -> Decimal {
    rust_decimal_macros::dec!(0.25)
}
fn default_low_pause_threshold_bps() -> Decimal {
    rust_decimal_macros::dec!(3)
}
fn default_low_resume_threshold_bps() -> Decimal {
    rust_decimal_macros::dec!(4.5)
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ema_half_life_ms: default_half_life_ms(),
            low_bps: default_low_bps(),
            high_bps: default_high_bps(),
            min_spread_bps: default_min_spread_bps(),
            max_spread_bps: default_max_spread_bps(),
            min_size_multiplier: default_min_size_multiplier(),
            max_size_multiplier: default_max_size_multiplier(),
            pause_threshold_bps: default_pause_threshold_bps(),
            resume_threshold_bps: default_resume_threshold_bps(),
            resume_inventory_ratio: default_resume_inventory_ratio(),
            low_pause_threshold_bps: default_low_pause_threshold_bps(),
            low_resume_threshold_bps: default_low_resume_threshold_bps(),
        }
    }
}

/// Volatility band feature.
pub struct VolatilityBand {
    config: VolatilityConfig,
    ema_bps: Option<Decimal>,
    last_mid: Option<Price>,
    last_at: Option<Instant>,
    paused_high: bool,
    paused_low: bool,
}

impl VolatilityBand {
    pub fn new(config: VolatilityConfig) -> Self {
        Self {
            config,
            ema_bps: None,
            last_mid: None,
            last_at: None,
            paused_high: false,
            paused_low: false,
        }
    }

    pub fn current_bps(&self) -> Decimal {
        self.ema_bps.unwrap_or(Decimal::ZERO)
    }

    /// Position of the current EMA inside [low, high], clamped to [0, 1].
    fn factor(&self) -> Decimal {
        let span = self.config.high_bps - self.config.low_bps;
        if span <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.current_bps() - self.config.low_bps) / span)
            .clamp(Decimal::ZERO, Decimal::ONE)
    }

    fn fold_sample(&mut self, mid: Price, at: Instant) {
        let (Some(last_mid), Some(last_at)) = (self.last_mid, self.last_at) else {
            self.last_mid = Some(mid);
            self.last_at = Some(at);
            self.ema_bps = Some(Decimal::ZERO);
            return;
        };
        if last_mid.is_zero() {
            return;
        }

        let change_bps = mid
            .bps_from(last_mid)
            .unwrap_or(Decimal::ZERO)
            .abs();
        let dt = at.duration_since(last_at).as_secs_f64().max(1e-6);
        let half_life = (self.config.ema_half_life_ms as f64 / 1000.0).max(1.0);
        // alpha = 1 - 2^(-dt / half_life); exact decimal alpha is not
        // needed for a smoothing coefficient.
        let alpha_f = 1.0 - (-std::f64::consts::LN_2 * dt / half_life).exp();
        let alpha = Decimal::from_f64(alpha_f).unwrap_or(Decimal::ZERO);

        let prev = self.ema_bps.unwrap_or(change_bps);
        self.ema_bps = Some(prev + alpha * (change_bps - prev));
        self.last_mid = Some(mid);
        self.last_at = Some(at);
    }

    fn advance_pause_state(&mut self, ctx: &QuoteContext) {
        let vol = self.current_bps();

        if !self.paused_high && vol >= self.config.pause_threshold_bps {
            self.paused_high = true;
            warn!(vol_bps = %vol, "volatility above pause threshold; gating both sides");
        } else if self.paused_high && vol <= self.config.resume_threshold_bps {
            let limit = ctx.inventory_soft_cap.inner() * self.config.resume_inventory_ratio;
            if ctx.inventory.abs().inner() <= limit {
                self.paused_high = false;
                info!(vol_bps = %vol, "volatility calmed; resuming quotes");
            }
        }

        if !self.paused_low
            && vol > Decimal::ZERO
            && vol <= self.config.low_pause_threshold_bps
        {
            self.paused_low = true;
            warn!(vol_bps = %vol, "volatility below low-water mark; gating both sides");
        } else if self.paused_low && vol >= self.config.low_resume_threshold_bps {
            self.paused_low = false;
            info!(vol_bps = %vol, "volatility recovered; resuming quotes");
        }
    }
}

impl Feature for VolatilityBand {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn update(&mut self, change: &StateChange) {
        if let StateChange::Mid { mid, at } = change {
            self.fold_sample(*mid, *at);
        }
    }

    fn adjust(&mut self, ctx: &QuoteContext) -> Adjustment {
        self.advance_pause_state(ctx);

        let factor = self.factor();
        let target_spread = self.config.min_spread_bps
            + (self.config.max_spread_bps - self.config.min_spread_bps) * factor;
        let size_multiplier = self.config.max_size_multiplier
            - (self.config.max_size_multiplier - self.config.min_size_multiplier) * factor;

        let gates = if self.paused_high || self.paused_low {
            SideGates::both()
        } else {
            SideGates::none()
        };

        let mut adjustment = Adjustment {
            spread_delta_bps: target_spread - ctx.base_spread_bps,
            size_multiplier: size_multiplier.max(Decimal::ZERO),
            gates,
            ..Default::default()
        };
        adjustment.signals.volatility_bps = Some(self.current_bps());
        adjustment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::Size;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn config() -> VolatilityConfig {
        VolatilityConfig {
            enabled: true,
            ema_half_life_ms: 30_000,
            low_bps: dec!(5),
            high_bps: dec!(25),
            min_spread_bps: dec!(10),
            max_spread_bps: dec!(20),
            min_size_multiplier: dec!(0.5),
            max_size_multiplier: dec!(1.0),
            pause_threshold_bps: dec!(35),
            resume_threshold_bps: dec!(25),
            resume_inventory_ratio: dec!(0.25),
            low_pause_threshold_bps: dec!(3),
            low_resume_threshold_bps: dec!(4.5),
        }
    }

    fn ctx(inventory: &str) -> QuoteContext {
        QuoteContext {
            mid: Price::new(dec!(100)),
            inventory: Size::new(inventory.parse().unwrap()),
            inventory_soft_cap: Size::new(dec!(0.1)),
            base_spread_bps: dec!(10),
            now: Instant::now(),
        }
    }

    /// Drive the EMA to roughly `target_bps` by feeding alternating
    /// moves of that magnitude.
    fn drive_ema(band: &mut VolatilityBand, target_bps: Decimal) {
        let t0 = Instant::now();
        let mut mid = dec!(100);
        band.update(&StateChange::Mid {
            mid: Price::new(mid),
            at: t0,
        });
        for i in 1..200u64 {
            let step = mid * target_bps / dec!(10000);
            mid = if i % 2 == 0 { mid + step } else { mid - step };
            band.update(&StateChange::Mid {
                mid: Price::new(mid),
                at: t0 + Duration::from_secs(i * 30),
            });
        }
    }

    #[test]
    fn test_spread_scales_with_volatility() {
        let mut calm = VolatilityBand::new(config());
        drive_ema(&mut calm, dec!(5));
        let adj = calm.adjust(&ctx("0"));
        // At the low end the target spread equals the floor.
        assert!(adj.spread_delta_bps <= dec!(1), "delta {}", adj.spread_delta_bps);
        assert!(adj.size_multiplier >= dec!(0.9));

        let mut hot = VolatilityBand::new(config());
        drive_ema(&mut hot, dec!(25));
        let adj = hot.adjust(&ctx("0"));
        // At the high end: ceiling spread, floor size.
        assert!(adj.spread_delta_bps >= dec!(9), "delta {}", adj.spread_delta_bps);
        assert!(adj.size_multiplier <= dec!(0.6));
    }

    #[test]
    fn test_extreme_volatility_pauses_both_sides() {
        let mut band = VolatilityBand::new(config());
        drive_ema(&mut band, dec!(40));

        let adj = band.adjust(&ctx("0"));
        assert_eq!(adj.gates, SideGates::both());
    }

    #[test]
    fn test_resume_requires_calm_and_low_inventory() {
        let mut band = VolatilityBand::new(config());
        drive_ema(&mut band, dec!(40));
        band.adjust(&ctx("0"));
        assert!(band.paused_high);

        // Calm down the EMA.
        drive_ema(&mut band, dec!(5));

        // Inventory above 25% of the soft cap: still paused.
        let adj = band.adjust(&ctx("0.05"));
        assert_eq!(adj.gates, SideGates::both());

        // Inventory inside the ratio: resume.
        let adj = band.adjust(&ctx("0.01"));
        assert_eq!(adj.gates, SideGates::none());
    }

    #[test]
    fn test_dead_market_pauses_and_recovers() {
        let mut band = VolatilityBand::new(config());
        drive_ema(&mut band, dec!(1));

        let adj = band.adjust(&ctx("0"));
        assert_eq!(adj.gates, SideGates::both(), "low-vol pause expected");

        drive_ema(&mut band, dec!(10));
        let adj = band.adjust(&ctx("0"));
        assert_eq!(adj.gates, SideGates::none());
    }

    #[test]
    fn test_signals_report_current_vol() {
        let mut band = VolatilityBand::new(config());
        drive_ema(&mut band, dec!(10));
        let adj = band.adjust(&ctx("0"));
        let vol = adj.signals.volatility_bps.unwrap();
        assert!(vol > dec!(5) && vol < dec!(15), "vol {vol}");
    }
}
