//! Clip sizing.
//!
//! A clip chips away at inventory without over-hedging past flat. The
//! cap at |inventory| applies BEFORE the exchange-minima round-up: if
//! no lot multiple satisfies both minima without exceeding the cap,
//! the hedger yields the cycle instead of silently posting an order
//! the exchange would reject (or one that would flip the position).

use pmm_core::{MarketSpec, Price, Size};
use rust_decimal::Decimal;

/// Inputs to one clip-sizing decision.
#[derive(Debug, Clone)]
pub struct ClipInputs {
    /// |inventory| at evaluation time.
    pub abs_inventory: Size,
    pub target_units: Size,
    pub max_clip_units: Size,
    /// Size cut while the PnL guard is active (< 1).
    pub guard_multiplier: Option<Decimal>,
    /// Clip boost in emergency-flatten mode (> 1).
    pub emergency_multiplier: Option<Decimal>,
}

/// Outcome of clip sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipDecision {
    Clip(Size),
    /// No lot multiple satisfies the exchange minima without exceeding
    /// |inventory|; skip this cycle.
    Yield,
}

/// Size the next clip against the exchange minima at `reference`.
pub fn size_clip(inputs: &ClipInputs, spec: &MarketSpec, reference: Price) -> ClipDecision {
    let abs_inv = inputs.abs_inventory;
    let mut limit = inputs.max_clip_units;
    if let Some(mult) = inputs.emergency_multiplier {
        if mult > Decimal::ONE {
            limit = limit * mult;
        }
    }
    if limit > abs_inv {
        limit = abs_inv;
    }

    let excess = abs_inv - inputs.target_units;
    if !excess.is_positive() {
        return ClipDecision::Yield;
    }

    let mut desired = if excess < limit { excess } else { limit };
    if let Some(mult) = inputs.guard_multiplier {
        if mult > Decimal::ZERO && mult < Decimal::ONE {
            desired = desired * mult;
        }
    }

    // Cap before the round-up: never hedge past flat.
    if desired > abs_inv {
        desired = abs_inv;
    }

    let Some(floors) = spec.min_units_for_notional(reference) else {
        return ClipDecision::Yield;
    };
    let lot = spec.lot_size();
    let candidate = desired.floor_to_lot(lot);
    let clip = if candidate < floors { floors } else { candidate };

    if clip > abs_inv {
        return ClipDecision::Yield;
    }
    ClipDecision::Clip(clip)
}
