//! Order vocabulary: sides, roles, identifiers, open-order records.

use crate::{MarketId, Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Quote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }

    /// Returns 1 for bid (adds exposure), -1 for ask.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Bid => 1,
            Self::Ask => -1,
        }
    }

    /// Signed inventory delta of a fill of this side.
    pub fn signed(&self, size: Size) -> Size {
        match self {
            Self::Bid => size,
            Self::Ask => -size,
        }
    }

    /// The side that flattens a signed inventory: asks reduce longs,
    /// bids reduce shorts.
    pub fn flattening(inventory: Size) -> Self {
        if inventory.is_positive() {
            Self::Ask
        } else {
            Self::Bid
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Logical producer of an order; used for accounting and per-role
/// mutual exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole {
    Maker,
    Hedger,
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maker => write!(f, "maker"),
            Self::Hedger => write!(f, "hedger"),
        }
    }
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client order ID for idempotency.
///
/// Every submission carries a unique cloid so retries after a timeout
/// cannot double-place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Format: `pmm_{timestamp_ms}_{uuid_short}`.
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("pmm_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An acknowledged resting order.
///
/// Created on exchange ack, mutated on partial fill, removed on full
/// fill or cancel ack. Owned by the StateStore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub market: MarketId,
    pub side: Side,
    pub price: Price,
    pub size_remaining: Size,
    pub role: OrderRole,
    /// Submit acknowledgement time (Unix milliseconds).
    pub submitted_at_ms: i64,
}

impl OpenOrder {
    /// Apply a partial fill; returns true when the order is exhausted.
    pub fn apply_fill(&mut self, size: Size) -> bool {
        self.size_remaining = self.size_remaining - size;
        !self.size_remaining.is_positive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite(), Side::Bid);
    }

    #[test]
    fn test_side_signed_delta() {
        let size = Size::new(dec!(0.5));
        assert_eq!(Side::Bid.signed(size).inner(), dec!(0.5));
        assert_eq!(Side::Ask.signed(size).inner(), dec!(-0.5));
    }

    #[test]
    fn test_flattening_side() {
        assert_eq!(Side::flattening(Size::new(dec!(0.01))), Side::Ask);
        assert_eq!(Side::flattening(Size::new(dec!(-0.01))), Side::Bid);
    }

    #[test]
    fn test_client_order_id_unique() {
        let id1 = ClientOrderId::new();
        let id2 = ClientOrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_open_order_partial_fill() {
        let mut order = OpenOrder {
            order_id: OrderId(1),
            market: MarketId::from("market:2"),
            side: Side::Bid,
            price: Price::new(dec!(100)),
            size_remaining: Size::new(dec!(1.0)),
            role: OrderRole::Maker,
            submitted_at_ms: 0,
        };

        assert!(!order.apply_fill(Size::new(dec!(0.4))));
        assert_eq!(order.size_remaining.inner(), dec!(0.6));
        assert!(order.apply_fill(Size::new(dec!(0.6))));
    }
}
