//! Typed frames for the market and account streams.
//!
//! Frames are self-describing JSON objects tagged by `type`. Numeric
//! fields are decimals (serialized as strings) so no precision is lost
//! on the wire boundary.

use pmm_core::{MarketId, OrderId, OrderRole, Price, Side, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Subscription request sent after connect, enumerating the market
/// channels to stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub channels: Vec<String>,
}

impl SubscriptionRequest {
    pub fn for_markets<'a>(markets: impl IntoIterator<Item = &'a MarketId>) -> Self {
        Self {
            channels: markets
                .into_iter()
                .map(|m| format!("mid:{m}"))
                .collect(),
        }
    }
}

/// Inbound market-data frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketFrame {
    MidUpdate {
        market: MarketId,
        best_bid: Price,
        best_ask: Price,
        /// Exchange frame time (Unix milliseconds).
        ts_ms: i64,
    },
    Ping,
    Pong,
    SubscriptionAck {
        channel: String,
    },
    Error {
        message: String,
    },
}

impl MarketFrame {
    /// Mid as the arithmetic mean of best bid and best ask.
    pub fn mid(&self) -> Option<Price> {
        match self {
            Self::MidUpdate {
                best_bid, best_ask, ..
            } => Some(Price::new(
                (best_bid.inner() + best_ask.inner()) / Decimal::from(2),
            )),
            _ => None,
        }
    }
}

/// Fill event from the account stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillFrame {
    pub market: MarketId,
    pub side: Side,
    pub role: OrderRole,
    pub size: Size,
    pub price: Price,
    pub fee: Decimal,
    pub ts_ms: i64,
    pub order_id: OrderId,
    /// Per-order fill counter; `(order_id, fill_sequence)` dedups
    /// at-least-once delivery.
    pub fill_sequence: u32,
}

/// Position snapshot from the account stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFrame {
    pub market: MarketId,
    pub signed_size: Size,
    pub avg_entry: Price,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub ts_ms: i64,
}

/// Inbound account frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountFrame {
    PositionUpdate(PositionFrame),
    Fill(FillFrame),
    Balance {
        total: Decimal,
        available: Decimal,
    },
    Ping,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mid_is_arithmetic_mean() {
        let frame = MarketFrame::MidUpdate {
            market: MarketId::from("market:2"),
            best_bid: Price::new(dec!(100.00)),
            best_ask: Price::new(dec!(100.02)),
            ts_ms: 0,
        };
        assert_eq!(frame.mid().unwrap().inner(), dec!(100.01));
    }

    #[test]
    fn test_market_frame_wire_format() {
        let raw = r#"{"type":"mid_update","market":"market:2","best_bid":"143.00","best_ask":"143.04","ts_ms":1700000000000}"#;
        let frame: MarketFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.mid().unwrap().inner(), dec!(143.02));

        let ping: MarketFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, MarketFrame::Ping);
    }

    #[test]
    fn test_account_frame_round_trip() {
        let frame = AccountFrame::Fill(FillFrame {
            market: MarketId::from("market:2"),
            side: Side::Ask,
            role: OrderRole::Hedger,
            size: Size::new(dec!(0.0735)),
            price: Price::new(dec!(142.97)),
            fee: dec!(0.002),
            ts_ms: 1,
            order_id: OrderId(42),
            fill_sequence: 0,
        });
        let raw = serde_json::to_string(&frame).unwrap();
        let back: AccountFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_subscription_channels() {
        let markets = [MarketId::from("market:1"), MarketId::from("market:2")];
        let req = SubscriptionRequest::for_markets(markets.iter());
        assert_eq!(req.channels, vec!["mid:market:1", "mid:market:2"]);
    }
}
