//! Market identification and specification.
//!
//! Markets are identified by an opaque string key assigned by the exchange
//! (e.g. "market:2"). The spec carries the wire scales and the exchange
//! minima every order must satisfy.

use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque market key (e.g. "market:2").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MarketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Market specification from configuration.
///
/// Immutable after registration at startup. `price_scale` and `size_scale`
/// are the integer decimal multipliers used when encoding orders for the
/// wire; `tick_size` and `lot_size` are derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSpec {
    /// Wire multiplier for prices (e.g. 100 -> tick 0.01).
    pub price_scale: u32,

    /// Wire multiplier for sizes (e.g. 10000 -> lot 0.0001).
    pub size_scale: u32,

    /// Minimum order size in base units.
    pub exchange_min_size: Size,

    /// Minimum order notional in quote currency.
    pub exchange_min_notional: Decimal,
}

impl MarketSpec {
    pub fn new(
        price_scale: u32,
        size_scale: u32,
        exchange_min_size: Size,
        exchange_min_notional: Decimal,
    ) -> Self {
        Self {
            price_scale,
            size_scale,
            exchange_min_size,
            exchange_min_notional,
        }
    }

    /// Minimum price increment: 1 / price_scale.
    pub fn tick_size(&self) -> Price {
        Price::new(Decimal::ONE / Decimal::from(self.price_scale.max(1)))
    }

    /// Minimum size increment: 1 / size_scale.
    pub fn lot_size(&self) -> Size {
        Size::new(Decimal::ONE / Decimal::from(self.size_scale.max(1)))
    }

    /// Smallest lot multiple satisfying BOTH `exchange_min_size` and
    /// `price * size >= exchange_min_notional` at the given reference price.
    ///
    /// Returns `None` when the reference price is zero (no notional floor
    /// can be computed).
    pub fn min_units_for_notional(&self, reference: Price) -> Option<Size> {
        if reference.is_zero() {
            return None;
        }
        let lot = self.lot_size();
        let size_floor = self.exchange_min_size.ceil_to_lot(lot);
        if self.exchange_min_notional.is_zero() {
            return Some(size_floor);
        }
        let notional_units =
            Size::new(self.exchange_min_notional / reference.inner()).ceil_to_lot(lot);
        Some(if notional_units > size_floor {
            notional_units
        } else {
            size_floor
        })
    }

    /// Check an order against the exchange minima and alignment rules.
    pub fn satisfies_minima(&self, price: Price, size: Size) -> bool {
        size >= self.exchange_min_size
            && size.notional(price) >= self.exchange_min_notional
            && price.is_tick_aligned(self.tick_size())
            && size.is_lot_aligned(self.lot_size())
    }
}

impl Default for MarketSpec {
    fn default() -> Self {
        Self {
            price_scale: 100,
            size_scale: 10_000,
            exchange_min_size: Size::new(rust_decimal_macros::dec!(0.001)),
            exchange_min_notional: rust_decimal_macros::dec!(10),
        }
    }
}
