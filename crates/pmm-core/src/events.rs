//! Structured event emission.
//!
//! Every component reports its actions as typed events. Routing to log
//! sinks or webhooks happens outside the core; here events get a
//! monotonic sequence number and a wall-clock timestamp, are logged via
//! `tracing`, and are fanned out to any subscribers.

use crate::{MarketId, OrderId, OrderRole, Price, Side, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    OrderSubmit {
        market: MarketId,
        side: Side,
        role: OrderRole,
        price: Price,
        size: Size,
    },
    OrderAck {
        market: MarketId,
        order_id: OrderId,
        side: Side,
        role: OrderRole,
    },
    OrderReject {
        market: MarketId,
        side: Side,
        role: OrderRole,
        reason: String,
    },
    Fill {
        market: MarketId,
        side: Side,
        role: OrderRole,
        price: Price,
        size: Size,
        inventory_after: Size,
    },
    GuardBlock {
        market: MarketId,
        reason: String,
    },
    GuardLatch {
        reason: String,
    },
    HedgerStateChange {
        market: MarketId,
        from: String,
        to: String,
    },
    MakerCycle {
        market: MarketId,
        bid: Option<Price>,
        ask: Option<Price>,
        spread_bps: Decimal,
    },
    ReconcileSnap {
        market: MarketId,
        ours: Size,
        exchange: Size,
    },
    IngestorReconnect {
        attempt: u32,
        delay_ms: u64,
    },
}

/// A sequenced, timestamped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number, process-wide.
    pub seq: u64,
    /// Wall-clock emission time (Unix milliseconds).
    pub ts_ms: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Process-wide event bus.
///
/// Emission never blocks; events to a bus with no subscribers are
/// dropped after logging.
pub struct EventBus {
    seq: AtomicU64,
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            seq: AtomicU64::new(0),
            tx,
        }
    }

    /// Emit an event: assign sequence + timestamp, log, fan out.
    pub fn emit(&self, kind: EventKind) -> Event {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            ts_ms: chrono::Utc::now().timestamp_millis(),
            kind,
        };
        debug!(seq = event.seq, event = ?event.kind, "event");
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let bus = EventBus::default();
        let e1 = bus.emit(EventKind::GuardLatch {
            reason: "crossed book".to_string(),
        });
        let e2 = bus.emit(EventKind::IngestorReconnect {
            attempt: 1,
            delay_ms: 1000,
        });

        assert_eq!(e1.seq, 0);
        assert_eq!(e2.seq, 1);
        assert!(e2.ts_ms >= e1.ts_ms);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(EventKind::GuardLatch {
            reason: "inventory".to_string(),
        });

        let got = rx.recv().await.unwrap();
        assert_eq!(got.seq, 0);
        match got.kind {
            EventKind::GuardLatch { reason } => assert_eq!(reason, "inventory"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(EventKind::IngestorReconnect {
            attempt: 3,
            delay_ms: 4000,
        });
        assert_eq!(bus.emitted(), 1);
    }
}
