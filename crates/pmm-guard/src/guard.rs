//! Pre-submit validation.
//!
//! Rules are checked in order and short-circuit: price band, crossed
//! book, inventory caps, exchange minima, mid freshness. Configurable
//! kill-switch flags select which rejection kinds latch the process-wide
//! block.

use crate::latch::{KillSwitchLatch, LatchReason};
use parking_lot::Mutex;
use pmm_core::{
    EventBus, EventKind, MarketId, MarketSpec, OrderRole, Price, Side, Size,
};
use pmm_state::StateStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Guard configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GuardConfig {
    /// Accepted distance from mid, in bps. An order at exactly the band
    /// is rejected.
    #[serde(default = "default_price_band_bps")]
    pub price_band_bps: Decimal,
    /// Hard cap on post-fill position, in base units.
    #[serde(default = "default_max_position_units")]
    pub max_position_units: Size,
    /// Hard cap on post-fill position notional, in quote currency.
    #[serde(default = "default_max_inventory_notional")]
    pub max_inventory_notional: Decimal,
    /// Oldest mid accepted for validation.
    #[serde(default = "default_max_mid_age_ms")]
    pub max_mid_age_ms: u64,
    #[serde(default = "default_true")]
    pub kill_on_crossed_book: bool,
    #[serde(default = "default_true")]
    pub kill_on_inventory_breach: bool,
}

fn default_price_band_bps() -> Decimal {
    rust_decimal_macros::dec!(50)
}
fn default_max_position_units() -> Size {
    Size::new(rust_decimal_macros::dec!(0.5))
}
fn default_max_inventory_notional() -> Decimal {
    rust_decimal_macros::dec!(1000)
}
fn default_max_mid_age_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            price_band_bps: default_price_band_bps(),
            max_position_units: default_max_position_units(),
            max_inventory_notional: default_max_inventory_notional(),
            max_mid_age_ms: default_max_mid_age_ms(),
            kill_on_crossed_book: true,
            kill_on_inventory_breach: true,
        }
    }
}

/// An order candidate under validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub market: MarketId,
    pub side: Side,
    pub price: Price,
    pub size: Size,
    pub role: OrderRole,
}

/// Why an order was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Kill switch latched; maker submissions blocked until reset.
    Latched,
    /// No mid available for the market.
    NoMid,
    PriceBand { deviation_bps: Decimal },
    CrossedBook,
    InventoryCap { projected: Size },
    BelowMinima,
    SyntheticMid,
    StaleMid { age: Duration },
}

impl RejectReason {
    fn counter_key(&self) -> &'static str {
        match self {
            Self::Latched => "latched",
            Self::NoMid => "no_mid",
            Self::PriceBand { .. } => "price_band",
            Self::CrossedBook => "crossed_book",
            Self::InventoryCap { .. } => "inventory_cap",
            Self::BelowMinima => "below_minima",
            Self::SyntheticMid => "synthetic_mid",
            Self::StaleMid { .. } => "stale_mid",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latched => write!(f, "kill switch latched"),
            Self::NoMid => write!(f, "no mid"),
            Self::PriceBand { deviation_bps } => {
                write!(f, "outside price band ({deviation_bps} bps)")
            }
            Self::CrossedBook => write!(f, "would cross the book"),
            Self::InventoryCap { projected } => {
                write!(f, "inventory cap breach (projected {projected})")
            }
            Self::BelowMinima => write!(f, "below exchange minima"),
            Self::SyntheticMid => write!(f, "mid is synthetic"),
            Self::StaleMid { age } => write!(f, "mid stale ({:.1}s)", age.as_secs_f64()),
        }
    }
}

/// Pre-trade guard.
pub struct Guard {
    config: GuardConfig,
    store: Arc<StateStore>,
    specs: HashMap<MarketId, MarketSpec>,
    latch: Arc<KillSwitchLatch>,
    events: Arc<EventBus>,
    reject_counts: Mutex<HashMap<&'static str, u64>>,
}

impl Guard {
    pub fn new(
        config: GuardConfig,
        store: Arc<StateStore>,
        specs: HashMap<MarketId, MarketSpec>,
        latch: Arc<KillSwitchLatch>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            specs,
            latch,
            events,
            reject_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn latch(&self) -> &Arc<KillSwitchLatch> {
        &self.latch
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Validate an order candidate. `Err` carries the first rule that
    /// failed; matching kill-switch flags latch as a side effect.
    pub fn validate(&self, request: &OrderRequest) -> Result<(), RejectReason> {
        let result = self.run_checks(request);
        if let Err(reason) = &result {
            self.record_rejection(request, reason);
            self.maybe_latch(request, reason);
        }
        result
    }

    fn run_checks(&self, request: &OrderRequest) -> Result<(), RejectReason> {
        // The latch blocks maker quoting outright; hedger flattening is
        // still allowed (emergency mode handles its own sizing).
        if self.latch.is_latched() && request.role == OrderRole::Maker {
            return Err(RejectReason::Latched);
        }

        let entry = self
            .store
            .get_mid(&request.market)
            .ok_or(RejectReason::NoMid)?;
        let mid = entry.price;

        // 1. Price band.
        let deviation_bps = request
            .price
            .bps_from(mid)
            .ok_or(RejectReason::NoMid)?
            .abs();
        if deviation_bps >= self.config.price_band_bps {
            return Err(RejectReason::PriceBand { deviation_bps });
        }

        // 2. Crossed book. Maker quotes must rest strictly around the
        // mid. Hedger orders cross the market by design, but must never
        // cross the bot's own resting maker quotes (self-trade).
        let crosses = match request.role {
            OrderRole::Maker => match request.side {
                Side::Bid => request.price >= mid,
                Side::Ask => request.price <= mid,
            },
            OrderRole::Hedger => {
                let opposing = self.store.get_orders(
                    &request.market,
                    Some(request.side.opposite()),
                    Some(OrderRole::Maker),
                );
                match request.side {
                    Side::Bid => opposing.iter().any(|o| o.price <= request.price),
                    Side::Ask => opposing.iter().any(|o| o.price >= request.price),
                }
            }
        };
        if crosses {
            return Err(RejectReason::CrossedBook);
        }

        // 3. Inventory caps on the post-fill position.
        let projected = self.store.get_inventory(&request.market)
            + request.side.signed(request.size);
        let projected_notional = projected.abs().notional(mid);
        if projected.abs() > self.config.max_position_units
            || projected_notional > self.config.max_inventory_notional
        {
            return Err(RejectReason::InventoryCap { projected });
        }

        // 4. Exchange minima and alignment.
        if let Some(spec) = self.specs.get(&request.market) {
            if !spec.satisfies_minima(request.price, request.size) {
                return Err(RejectReason::BelowMinima);
            }
        }

        // 5. Mid freshness.
        if entry.synthetic {
            return Err(RejectReason::SyntheticMid);
        }
        let age = entry.age();
        if age > Duration::from_millis(self.config.max_mid_age_ms) {
            return Err(RejectReason::StaleMid { age });
        }

        Ok(())
    }

    fn record_rejection(&self, request: &OrderRequest, reason: &RejectReason) {
        *self
            .reject_counts
            .lock()
            .entry(reason.counter_key())
            .or_insert(0) += 1;
        warn!(
            market = %request.market,
            side = %request.side,
            role = %request.role,
            reason = %reason,
            "guard rejected order"
        );
        self.events.emit(EventKind::GuardBlock {
            market: request.market.clone(),
            reason: reason.to_string(),
        });
    }

    fn maybe_latch(&self, request: &OrderRequest, reason: &RejectReason) {
        let latch_reason = match reason {
            RejectReason::CrossedBook if self.config.kill_on_crossed_book => {
                LatchReason::CrossedBook {
                    market: request.market.clone(),
                }
            }
            RejectReason::InventoryCap { .. } if self.config.kill_on_inventory_breach => {
                LatchReason::InventoryBreach {
                    market: request.market.clone(),
                }
            }
            _ => return,
        };
        if !self.latch.is_latched() {
            self.latch.trigger(latch_reason.clone());
            self.events.emit(EventKind::GuardLatch {
                reason: latch_reason.to_string(),
            });
        }
    }

    pub fn rejection_count(&self, key: &str) -> u64 {
        self.reject_counts.lock().get(key).copied().unwrap_or(0)
    }
}
