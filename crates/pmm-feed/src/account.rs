//! Account-stream ingestor.
//!
//! Consumes position snapshots and fill events. Fills are deduplicated
//! by `(order_id, fill_sequence)`, written to the ledger before any
//! state mutation, then folded into inventory, the PnL compositor, and
//! the volume accumulators. Position snapshots reconcile the store
//! against the exchange; disagreement beyond one lot snaps and
//! suspends maker quoting.

use crate::backoff::ReconnectBackoff;
use parking_lot::Mutex;
use pmm_core::{EventBus, EventKind, Fill, MarketId, OrderId, Size};
use pmm_ledger::{AppendOutcome, FillLedger, PnlCompositor};
use pmm_state::{CostBasis, ReconcileOutcome, StateStore, LEDGER_DEGRADED_FLAG};
use pmm_ws::{AccountConnector, AccountFrame, AccountStream, FillFrame, PositionFrame, WsError};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Heartbeat source name for the account feed.
pub const ACCOUNT_HEARTBEAT: &str = "account";

/// Account ingestor tuning.
#[derive(Debug, Clone)]
pub struct AccountIngestorConfig {
    /// Lot size per market, for the reconciliation drift threshold.
    pub lot_sizes: HashMap<MarketId, Size>,
    /// Maker suspension after a reconcile snap.
    pub reconcile_cooldown: Duration,
    /// Longest silence tolerated before counting a keepalive miss.
    pub keepalive_interval: Duration,
    /// Buffered-ledger age that escalates to a fatal event.
    pub buffer_deadline: Duration,
    /// Dedup window size (fills remembered).
    pub dedup_capacity: usize,
    pub backoff: ReconnectBackoff,
}

impl Default for AccountIngestorConfig {
    fn default() -> Self {
        Self {
            lot_sizes: HashMap::new(),
            reconcile_cooldown: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(20),
            buffer_deadline: Duration::from_secs(60),
            dedup_capacity: 4096,
            backoff: ReconnectBackoff::default(),
        }
    }
}

/// Account-stream ingestor task.
pub struct AccountIngestor {
    config: AccountIngestorConfig,
    connector: Arc<dyn AccountConnector>,
    store: Arc<StateStore>,
    ledger: Arc<Mutex<FillLedger>>,
    compositor: Arc<Mutex<PnlCompositor>>,
    events: Arc<EventBus>,
    /// Woken on every fill so the hedger reacts immediately.
    fill_wake: Arc<Notify>,
    shutdown: CancellationToken,
    seen_fills: HashSet<(OrderId, u32)>,
    seen_order: VecDeque<(OrderId, u32)>,
    last_position_ts: HashMap<MarketId, i64>,
    buffering_since: Option<Instant>,
}

impl AccountIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AccountIngestorConfig,
        connector: Arc<dyn AccountConnector>,
        store: Arc<StateStore>,
        ledger: Arc<Mutex<FillLedger>>,
        compositor: Arc<Mutex<PnlCompositor>>,
        events: Arc<EventBus>,
        fill_wake: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            ledger,
            compositor,
            events,
            fill_wake,
            shutdown,
            seen_fills: HashSet::new(),
            seen_order: VecDeque::new(),
            last_position_ts: HashMap::new(),
            buffering_since: None,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        let mut attempt = 0u32;
        info!("account ingestor starting");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.connector.connect().await {
                Ok(stream) => {
                    attempt = 0;
                    if let Err(e) = self.run_session(stream).await {
                        warn!(error = %e, "account session ended");
                    }
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "account connect failed"),
            }

            attempt += 1;
            let delay = self.config.backoff.delay(attempt);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => break,
            }
        }
        info!("account ingestor stopped");
    }

    async fn run_session(&mut self, mut stream: Box<dyn AccountStream>) -> Result<(), WsError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            self.drain_buffered_appends();

            let next = tokio::time::timeout(self.config.keepalive_interval, stream.next_frame());
            match next.await {
                Ok(Ok(frame)) => {
                    self.store.heartbeat(ACCOUNT_HEARTBEAT);
                    match frame {
                        AccountFrame::Fill(fill) => self.handle_fill(fill),
                        AccountFrame::PositionUpdate(position) => self.handle_position(position),
                        AccountFrame::Balance { total, available } => {
                            debug!(%total, %available, "balance frame");
                        }
                        AccountFrame::Ping => stream.send_pong().await?,
                        AccountFrame::Pong => {}
                    }
                }
                Ok(Err(WsError::Parse(message))) => {
                    warn!(message, "dropping unparseable account frame");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("account stream idle");
                }
            }
        }
    }

    fn handle_fill(&mut self, frame: FillFrame) {
        let key = (frame.order_id, frame.fill_sequence);
        if self.seen_fills.contains(&key) {
            debug!(order_id = %frame.order_id, seq = frame.fill_sequence, "duplicate fill dropped");
            return;
        }

        let signed = frame.side.signed(frame.size);
        let notional = frame.size.notional(frame.price);
        let quote_delta = notional * Decimal::from(-frame.side.sign());
        let projected = self.store.get_inventory(&frame.market) + signed;

        let fill = Fill {
            ts_ms: frame.ts_ms,
            market: frame.market.clone(),
            side: frame.side,
            role: frame.role,
            size: frame.size,
            price: frame.price,
            fee: frame.fee,
            quote_delta,
            inventory_after: projected,
        };

        // Ledger first: an out-of-order record is discarded before it
        // can move inventory, keeping lot-sum == inventory intact.
        let outcome = self.ledger.lock().append(fill.clone());
        match outcome {
            AppendOutcome::OutOfOrder => return,
            AppendOutcome::Appended => self.mark_ledger_healthy(),
            AppendOutcome::Buffered => self.mark_ledger_degraded(),
        }

        self.remember_fill(key);
        let inventory = self.store.update_inventory(&frame.market, signed);
        let lot_sum = {
            let mut compositor = self.compositor.lock();
            compositor.on_fill(&fill);
            let (avg_price, signed_size) = compositor.cost_basis(&frame.market);
            self.store.set_cost_basis(
                &frame.market,
                CostBasis {
                    avg_price,
                    signed_size,
                },
            );
            compositor.lot_sum(&frame.market)
        };
        // The signed lot-queue sum must track inventory exactly; drift
        // means a fill was applied to one and not the other.
        if lot_sum != inventory {
            error!(
                market = %frame.market,
                lot_sum = %lot_sum,
                inventory = %inventory,
                "lot queue and inventory disagree; reconciliation fault"
            );
        }
        self.store.record_fill_volume(frame.role, notional, frame.fee);
        self.events.emit(EventKind::Fill {
            market: frame.market,
            side: frame.side,
            role: frame.role,
            price: frame.price,
            size: frame.size,
            inventory_after: projected,
        });
        self.fill_wake.notify_one();
    }

    fn handle_position(&mut self, position: PositionFrame) {
        let last = self
            .last_position_ts
            .get(&position.market)
            .copied()
            .unwrap_or(i64::MIN);
        if position.ts_ms <= last {
            debug!(market = %position.market, ts_ms = position.ts_ms, "stale position discarded");
            return;
        }
        self.last_position_ts
            .insert(position.market.clone(), position.ts_ms);

        let lot = self
            .config
            .lot_sizes
            .get(&position.market)
            .copied()
            .unwrap_or(Size::ZERO);
        let outcome = self.store.reconcile_inventory(
            &position.market,
            position.signed_size,
            lot,
            self.config.reconcile_cooldown,
        );
        if let ReconcileOutcome::Snapped { ours, exchange } = outcome {
            self.events.emit(EventKind::ReconcileSnap {
                market: position.market,
                ours,
                exchange,
            });
        }
    }

    fn drain_buffered_appends(&mut self) {
        let pending = self.ledger.lock().pending_count();
        if pending == 0 {
            self.mark_ledger_healthy();
            return;
        }
        let drained = self.ledger.lock().retry_pending();
        let remaining = self.ledger.lock().pending_count();
        if drained > 0 && remaining == 0 {
            self.mark_ledger_healthy();
            return;
        }
        if let Some(since) = self.buffering_since {
            if since.elapsed() >= self.config.buffer_deadline {
                error!(
                    pending,
                    seconds = since.elapsed().as_secs(),
                    "ledger storage unavailable past deadline"
                );
            }
        }
    }

    fn mark_ledger_degraded(&mut self) {
        if self.buffering_since.is_none() {
            self.buffering_since = Some(Instant::now());
        }
        self.store.set_flag(LEDGER_DEGRADED_FLAG, true);
    }

    fn mark_ledger_healthy(&mut self) {
        if self.buffering_since.take().is_some() || self.store.get_flag(LEDGER_DEGRADED_FLAG) {
            self.store.set_flag(LEDGER_DEGRADED_FLAG, false);
        }
    }

    fn remember_fill(&mut self, key: (OrderId, u32)) {
        self.seen_fills.insert(key);
        self.seen_order.push_back(key);
        while self.seen_order.len() > self.config.dedup_capacity {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen_fills.remove(&old);
            }
        }
    }
}
