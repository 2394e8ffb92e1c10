//! Paper trading client.
//!
//! Acks submissions locally and tracks the simulated resting book.
//! Used in dry-run mode so the whole pipeline exercises order flow
//! without keys or a venue.

use async_trait::async_trait;
use parking_lot::Mutex;
use pmm_core::{
    CancelAck, MarketId, OrderId, OrderRole, Price, Side, Size, SubmitError, TradingClient,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A simulated resting order.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub market: MarketId,
    pub side: Side,
    pub price: Price,
    pub size: Size,
    pub post_only: bool,
    pub role: OrderRole,
}

/// Order-entry client that never leaves the process.
#[derive(Default)]
pub struct PaperTradingClient {
    next_id: AtomicU64,
    resting: Mutex<HashMap<OrderId, PaperOrder>>,
}

impl PaperTradingClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            resting: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the simulated book for a market.
    pub fn resting_orders(&self, market: &MarketId) -> Vec<(OrderId, PaperOrder)> {
        self.resting
            .lock()
            .iter()
            .filter(|(_, o)| o.market == *market)
            .map(|(id, o)| (*id, o.clone()))
            .collect()
    }
}

#[async_trait]
impl TradingClient for PaperTradingClient {
    async fn submit_limit(
        &self,
        market: &MarketId,
        side: Side,
        price: Price,
        size: Size,
        post_only: bool,
        role: OrderRole,
    ) -> Result<OrderId, SubmitError> {
        let order_id = OrderId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.resting.lock().insert(
            order_id,
            PaperOrder {
                market: market.clone(),
                side,
                price,
                size,
                post_only,
                role,
            },
        );
        debug!(
            market = %market,
            order_id = %order_id,
            side = %side,
            price = %price,
            size = %size,
            "paper order accepted"
        );
        Ok(order_id)
    }

    async fn cancel(&self, _market: &MarketId, order_id: OrderId) -> Result<CancelAck, SubmitError> {
        match self.resting.lock().remove(&order_id) {
            Some(_) => Ok(CancelAck::Canceled),
            None => Ok(CancelAck::NotFound),
        }
    }

    async fn cancel_all(&self, market: &MarketId) -> Result<usize, SubmitError> {
        let mut resting = self.resting.lock();
        let before = resting.len();
        resting.retain(|_, o| o.market != *market);
        Ok(before - resting.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mk() -> MarketId {
        MarketId::from("market:2")
    }

    #[tokio::test]
    async fn test_submit_cancel_round_trip() {
        let client = PaperTradingClient::new();
        let id = client
            .submit_limit(
                &mk(),
                Side::Bid,
                Price::new(dec!(99.99)),
                Size::new(dec!(0.1)),
                true,
                OrderRole::Maker,
            )
            .await
            .unwrap();

        assert_eq!(client.resting_orders(&mk()).len(), 1);
        assert_eq!(client.cancel(&mk(), id).await.unwrap(), CancelAck::Canceled);
        assert_eq!(client.cancel(&mk(), id).await.unwrap(), CancelAck::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_all_counts() {
        let client = PaperTradingClient::new();
        for price in ["99.98", "100.02"] {
            client
                .submit_limit(
                    &mk(),
                    Side::Bid,
                    Price::new(price.parse().unwrap()),
                    Size::new(dec!(0.1)),
                    true,
                    OrderRole::Maker,
                )
                .await
                .unwrap();
        }
        assert_eq!(client.cancel_all(&mk()).await.unwrap(), 2);
        assert!(client.resting_orders(&mk()).is_empty());
    }
}
