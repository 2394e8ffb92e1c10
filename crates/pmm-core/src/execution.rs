//! Order-entry interface and classified execution errors.
//!
//! The concrete exchange transport lives outside the core. Components
//! submit through the `TradingClient` trait and react to *classified*
//! errors, never raw exchange text. The in-flight table enforces the
//! single-operation discipline per (market, side, role).

use crate::{MarketId, OrderId, OrderRole, Price, Side, Size};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Classified submit/cancel failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitErrorKind {
    /// Order below the exchange notional floor. Logic bug; never retried.
    MinNotional,
    /// Order below the exchange size floor. Logic bug; never retried.
    MinSize,
    /// Post-only order would cross the book.
    Crossed,
    /// Nonce collision; retryable.
    Nonce,
    /// Exchange rate limit; retryable with backoff.
    RateLimited,
    /// Insufficient margin for the position delta.
    InsufficientMargin,
    /// Transport-level failure (connect, timeout); retryable.
    Network,
    Other,
}

impl SubmitErrorKind {
    /// Transient errors retry with backoff; permanent ones surface to the
    /// guard and skip the side for the cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Nonce | Self::RateLimited | Self::Network)
    }
}

impl fmt::Display for SubmitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MinNotional => "min_notional",
            Self::MinSize => "min_size",
            Self::Crossed => "crossed",
            Self::Nonce => "nonce",
            Self::RateLimited => "rate_limited",
            Self::InsufficientMargin => "insufficient_margin",
            Self::Network => "network",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Submit/cancel error with classification.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    pub message: String,
}

impl SubmitError {
    pub fn new(kind: SubmitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Cancel acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    Canceled,
    /// Already gone (filled or previously canceled). Not an error.
    NotFound,
}

/// Typed outcome of one submission attempt, composed by the scheduler.
/// Every outcome becomes an event so no order is silently lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(OrderId),
    Rejected(SubmitErrorKind),
    Throttled,
    Skipped { reason: String },
}

/// Abstract order-entry client.
///
/// Implementations sign and route to the venue; the core only depends on
/// this shape.
#[async_trait]
pub trait TradingClient: Send + Sync {
    /// Submit a limit order. `post_only` orders must rest or be rejected
    /// with `Crossed`.
    async fn submit_limit(
        &self,
        market: &MarketId,
        side: Side,
        price: Price,
        size: Size,
        post_only: bool,
        role: OrderRole,
    ) -> Result<OrderId, SubmitError>;

    /// Cancel a single order.
    async fn cancel(&self, market: &MarketId, order_id: OrderId) -> Result<CancelAck, SubmitError>;

    /// Cancel every resting order on the market; returns the count.
    async fn cancel_all(&self, market: &MarketId) -> Result<usize, SubmitError>;
}

/// One reserved (market, side, role) slot. Released on drop.
pub struct InFlightSlot {
    table: Arc<Mutex<HashSet<(MarketId, Side, OrderRole)>>>,
    key: (MarketId, Side, OrderRole),
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.table.lock().remove(&self.key);
    }
}

/// Enforces at most one in-flight submit or cancel per
/// (market, side, role). Re-entry attempts fail fast instead of queuing.
#[derive(Clone, Default)]
pub struct InFlightTable {
    slots: Arc<Mutex<HashSet<(MarketId, Side, OrderRole)>>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot, or `None` when an operation is already in flight.
    pub fn try_acquire(&self, market: &MarketId, side: Side, role: OrderRole) -> Option<InFlightSlot> {
        let key = (market.clone(), side, role);
        let mut slots = self.slots.lock();
        if !slots.insert(key.clone()) {
            return None;
        }
        Some(InFlightSlot {
            table: self.slots.clone(),
            key,
        })
    }

    pub fn is_busy(&self, market: &MarketId, side: Side, role: OrderRole) -> bool {
        self.slots
            .lock()
            .contains(&(market.clone(), side, role))
    }
}
