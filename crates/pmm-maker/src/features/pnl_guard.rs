//! PnL guard.
//!
//! Widens the spread and cuts size after realized losses: when the
//! rolling-window realized PnL stays below the floor for enough
//! consecutive checks, the guard engages. Release is configurable:
//! either a fixed cooldown elapses, or windowed PnL recovers above a
//! threshold.

use super::{Adjustment, Feature, QuoteContext, StateChange};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How an engaged guard releases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ReleasePolicy {
    /// Release after a fixed cooldown.
    Cooldown {
        #[serde(default = "default_cooldown_ms")]
        after_ms: u64,
    },
    /// Release once windowed PnL recovers above the threshold.
    Recovery {
        #[serde(default)]
        above: Decimal,
    },
}

fn default_cooldown_ms() -> u64 {
    120_000
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        Self::Cooldown {
            after_ms: default_cooldown_ms(),
        }
    }
}

/// PnL guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlGuardConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Windowed realized PnL below this arms the trigger.
    #[serde(default = "default_floor")]
    pub realized_floor_quote: Decimal,
    /// Consecutive below-floor checks required to engage.
    #[serde(default = "default_consecutive")]
    pub consecutive_triggers: u32,
    /// Checks are throttled to this interval.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_widen_bps")]
    pub widen_bps: Decimal,
    /// Hard cap on the extra spread.
    #[serde(default = "default_max_extra_bps")]
    pub max_extra_bps: Decimal,
    #[serde(default = "default_clip_multiplier")]
    pub clip_multiplier: Decimal,
    /// Floor for the size cut.
    #[serde(default = "default_min_size_multiplier")]
    pub min_size_multiplier: Decimal,
    #[serde(default)]
    pub release: ReleasePolicy,
}

fn default_floor() -> Decimal {
    rust_decimal_macros::dec!(-0.20)
}
fn default_consecutive() -> u32 {
    1
}
fn default_check_interval_ms() -> u64 {
    15_000
}
fn default_widen_bps() -> Decimal {
    rust_decimal_macros::dec!(6)
}
fn default_max_extra_bps() -> Decimal {
    rust_decimal_macros::dec!(10)
}
fn default_clip_multiplier() -> Decimal {
    rust_decimal_macros::dec!(0.85)
}
fn default_min_size_multiplier() -> Decimal {
    rust_decimal_macros::dec!(0.6)
}

impl Default for PnlGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            realized_floor_quote: default_floor(),
            consecutive_triggers: default_consecutive(),
            check_interval_ms: default_check_interval_ms(),
            widen_bps: default_widen_bps(),
            max_extra_bps: default_max_extra_bps(),
            clip_multiplier: default_clip_multiplier(),
            min_size_multiplier: default_min_size_multiplier(),
            release: ReleasePolicy::default(),
        }
    }
}

/// PnL guard feature.
pub struct PnlGuard {
    config: PnlGuardConfig,
    windowed_pnl: Decimal,
    consecutive: u32,
    active: bool,
    engaged_at: Option<Instant>,
    last_check: Option<Instant>,
}

impl PnlGuard {
    pub fn new(config: PnlGuardConfig) -> Self {
        Self {
            config,
            windowed_pnl: Decimal::ZERO,
            consecutive: 0,
            active: false,
            engaged_at: None,
            last_check: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn check(&mut self, now: Instant) {
        let due = self
            .last_check
            .map_or(true, |last| {
                now.duration_since(last) >= Duration::from_millis(self.config.check_interval_ms)
            });
        if !due {
            return;
        }
        self.last_check = Some(now);

        if !self.active {
            if self.windowed_pnl < self.config.realized_floor_quote {
                self.consecutive += 1;
                if self.consecutive >= self.config.consecutive_triggers {
                    self.active = true;
                    self.engaged_at = Some(now);
                    warn!(
                        windowed_pnl = %self.windowed_pnl,
                        floor = %self.config.realized_floor_quote,
                        "pnl guard engaged"
                    );
                }
            } else {
                self.consecutive = 0;
            }
            return;
        }

        let release = match self.config.release {
            ReleasePolicy::Cooldown { after_ms } => self
                .engaged_at
                .is_some_and(|at| now.duration_since(at) >= Duration::from_millis(after_ms)),
            ReleasePolicy::Recovery { above } => self.windowed_pnl > above,
        };
        if release {
            self.active = false;
            self.engaged_at = None;
            self.consecutive = 0;
            info!("pnl guard released");
        }
    }
}

impl Feature for PnlGuard {
    fn name(&self) -> &'static str {
        "pnl_guard"
    }

    fn update(&mut self, change: &StateChange) {
        if let StateChange::WindowedPnl { realized } = change {
            self.windowed_pnl = *realized;
        }
    }

    fn adjust(&mut self, ctx: &QuoteContext) -> Adjustment {
        self.check(ctx.now);

        let mut adjustment = if self.active {
            Adjustment {
                spread_delta_bps: self.config.widen_bps.min(self.config.max_extra_bps),
                size_multiplier: self
                    .config
                    .clip_multiplier
                    .max(self.config.min_size_multiplier),
                ..Default::default()
            }
        } else {
            Adjustment::default()
        };
        adjustment.signals.pnl_guard_active = self.active;
        adjustment
    }
}
