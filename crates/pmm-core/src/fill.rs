//! The persistent fill record.
//!
//! One fill per ledger line. All monetary fields are decimals and
//! serialize as strings to preserve precision across restarts.

use crate::{MarketId, OrderRole, Price, Side, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single executed fill. Append-only: once written to the ledger it is
/// never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Wall-clock fill time (Unix milliseconds).
    pub ts_ms: i64,
    pub market: MarketId,
    pub side: Side,
    pub role: OrderRole,
    pub size: Size,
    pub price: Price,
    /// Fee paid in quote currency.
    pub fee: Decimal,
    /// Signed change to the quote balance (negative for buys).
    pub quote_delta: Decimal,
    /// Inventory after applying this fill.
    pub inventory_after: Size,
}

impl Fill {
    /// Signed base-unit delta: bid = +size, ask = -size.
    pub fn signed_size(&self) -> Size {
        self.side.signed(self.size)
    }

    /// Notional value in quote currency.
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Fill {
        Fill {
            ts_ms: 1_700_000_000_000,
            market: MarketId::from("market:2"),
            side: Side::Ask,
            role: OrderRole::Hedger,
            size: Size::new(dec!(0.0735)),
            price: Price::new(dec!(142.97)),
            fee: dec!(0.0021),
            quote_delta: dec!(10.508295),
            inventory_after: Size::new(dec!(-0.0635)),
        }
    }

    #[test]
    fn test_signed_size() {
        let fill = sample();
        assert_eq!(fill.signed_size().inner(), dec!(-0.0735));
    }

    #[test]
    fn test_json_round_trip_preserves_precision() {
        let fill = sample();
        let line = serde_json::to_string(&fill).unwrap();
        // Decimals serialize as strings; no float representation on disk.
        assert!(line.contains("\"0.0735\""));
        let back: Fill = serde_json::from_str(&line).unwrap();
        assert_eq!(back, fill);
    }
}
