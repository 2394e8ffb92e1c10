//! Quote formation: spread application, quantization, exchange floors.
//!
//! Pure computation; the engine owns submission. Bid prices round down
//! to the tick and asks round up, so quantization can only widen the
//! spread, never cross it.

use crate::features::SideGates;
use pmm_core::{MarketSpec, Price, Size};
use rust_decimal::Decimal;

/// A computed quote snapshot. Supersedes any prior snapshot with a
/// lower generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotePlan {
    pub bid: Option<(Price, Size)>,
    pub ask: Option<(Price, Size)>,
    pub spread_bps: Decimal,
    pub generation_id: u64,
}

impl QuotePlan {
    pub fn is_empty(&self) -> bool {
        self.bid.is_none() && self.ask.is_none()
    }
}

/// Build a quote plan around `mid`.
///
/// `spread_bps` is the full effective spread (already floored by the
/// engine); `raw_size` has every multiplier applied. Sizes quantize
/// down to the lot, then round back up to the smallest lot multiple
/// satisfying the exchange floors. Returns `None` when a side's
/// rounded-up size would exceed `max_clip` (abort the market for this
/// cycle).
pub fn build_plan(
    mid: Price,
    spread_bps: Decimal,
    raw_size: Size,
    spec: &MarketSpec,
    max_clip: Size,
    gates: SideGates,
    generation_id: u64,
) -> Option<QuotePlan> {
    let half_frac = spread_bps / Decimal::from(20_000);
    let raw_bid = Price::new(mid.inner() * (Decimal::ONE - half_frac));
    let raw_ask = Price::new(mid.inner() * (Decimal::ONE + half_frac));

    let tick = spec.tick_size();
    let bid_price = raw_bid.floor_to_tick(tick);
    let ask_price = raw_ask.ceil_to_tick(tick);

    let base_size = raw_size.floor_to_lot(spec.lot_size());

    let bid = if gates.bid {
        None
    } else {
        Some((bid_price, size_for_side(base_size, bid_price, spec, max_clip)?))
    };
    let ask = if gates.ask {
        None
    } else {
        Some((ask_price, size_for_side(base_size, ask_price, spec, max_clip)?))
    };

    Some(QuotePlan {
        bid,
        ask,
        spread_bps,
        generation_id,
    })
}

/// Round a side's size up to the exchange floors; `None` when that
/// would exceed the clip cap.
fn size_for_side(
    size: Size,
    price: Price,
    spec: &MarketSpec,
    max_clip: Size,
) -> Option<Size> {
    let floors = spec.min_units_for_notional(price)?;
    let sized = if size < floors { floors } else { size };
    if sized > max_clip {
        return None;
    }
    Some(sized)
}
