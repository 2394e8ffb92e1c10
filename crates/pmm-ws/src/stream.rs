//! Abstract stream interfaces consumed by the ingestors.
//!
//! The ingestor owns reconnection policy; a connector only knows how to
//! establish one session. Tests drive the ingestor with channel-backed
//! implementations of these traits.

use crate::error::WsResult;
use crate::message::{AccountFrame, MarketFrame, SubscriptionRequest};
use async_trait::async_trait;

/// One live market-data session.
#[async_trait]
pub trait MarketStream: Send {
    /// Next inbound frame. `Err(WsError::Closed)` ends the session.
    async fn next_frame(&mut self) -> WsResult<MarketFrame>;

    /// Answer a server keep-alive.
    async fn send_pong(&mut self) -> WsResult<()>;

    /// Re-send a subscription (after repeated parse errors on a channel).
    async fn resubscribe(&mut self, request: &SubscriptionRequest) -> WsResult<()>;
}

/// Establishes market-data sessions.
#[async_trait]
pub trait MarketConnector: Send + Sync {
    async fn connect(
        &self,
        request: &SubscriptionRequest,
    ) -> WsResult<Box<dyn MarketStream>>;
}

/// One live account session.
#[async_trait]
pub trait AccountStream: Send {
    async fn next_frame(&mut self) -> WsResult<AccountFrame>;

    async fn send_pong(&mut self) -> WsResult<()>;
}

/// Establishes account sessions.
#[async_trait]
pub trait AccountConnector: Send + Sync {
    async fn connect(&self) -> WsResult<Box<dyn AccountStream>>;
}
