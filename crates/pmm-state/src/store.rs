//! The state store proper.

use dashmap::DashMap;
use parking_lot::Mutex;
use pmm_core::{MarketId, OpenOrder, OrderId, OrderRole, Price, Side, Size};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Store flag raised while ledger appends are buffering in memory.
pub const LEDGER_DEGRADED_FLAG: &str = "ledger_degraded";

/// Store flag mirroring the maker's PnL-guard state for the hedger.
pub const PNL_GUARD_FLAG: &str = "pnl_guard_active";

/// A mid price with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidEntry {
    pub price: Price,
    /// Wall-clock frame time (Unix milliseconds), for records.
    pub ts_ms: i64,
    /// Monotonic receive time, for staleness checks.
    pub received: Instant,
    /// Synthetic mids keep downstream logic warm but are invalid for
    /// order placement.
    pub synthetic: bool,
}

impl MidEntry {
    pub fn age(&self) -> Duration {
        self.received.elapsed()
    }
}

/// Cost basis derived from the compositor's current lot queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CostBasis {
    pub avg_price: Price,
    pub signed_size: Size,
}

/// Per-role volume and fee accumulators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeStats {
    pub maker_notional: Decimal,
    pub hedger_notional: Decimal,
    pub maker_fees: Decimal,
    pub hedger_fees: Decimal,
    pub maker_fills: u64,
    pub hedger_fills: u64,
}

/// Outcome of reconciling against an exchange position snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Within one lot of the exchange value; nothing to do.
    InSync,
    /// Snapped to the exchange value; maker quoting is suspended for the
    /// configured cooldown.
    Snapped { ours: Size, exchange: Size },
}

/// Single in-process authority for mids, inventory, open orders and
/// cost basis.
///
/// The store never invents quantity: inventory only moves on fills and
/// explicit reconciliations from the account stream.
pub struct StateStore {
    mids: DashMap<MarketId, MidEntry>,
    inventory: DashMap<MarketId, Size>,
    orders: DashMap<OrderId, OpenOrder>,
    cost_basis: DashMap<MarketId, CostBasis>,
    heartbeats: DashMap<String, Instant>,
    /// Monotonic time since the guard has been blocking the maker, per
    /// market. Consumed by the hedger's emergency escalation.
    guard_blocked_since: DashMap<MarketId, Instant>,
    /// Named boolean flags (e.g. "pnl_guard_active").
    flags: DashMap<String, bool>,
    volume: Mutex<VolumeStats>,
    /// Maker quoting suspended until this instant (reconcile snaps,
    /// ledger write failures).
    maker_suspended_until: Mutex<Option<Instant>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            mids: DashMap::new(),
            inventory: DashMap::new(),
            orders: DashMap::new(),
            cost_basis: DashMap::new(),
            heartbeats: DashMap::new(),
            guard_blocked_since: DashMap::new(),
            flags: DashMap::new(),
            volume: Mutex::new(VolumeStats::default()),
            maker_suspended_until: Mutex::new(None),
        }
    }

    // -------- Mids ----------

    pub fn set_mid(&self, market: &MarketId, price: Price, ts_ms: i64) {
        self.mids.insert(
            market.clone(),
            MidEntry {
                price,
                ts_ms,
                received: Instant::now(),
                synthetic: false,
            },
        );
    }

    pub fn set_synthetic_mid(&self, market: &MarketId, price: Price, ts_ms: i64) {
        self.mids.insert(
            market.clone(),
            MidEntry {
                price,
                ts_ms,
                received: Instant::now(),
                synthetic: true,
            },
        );
    }

    pub fn get_mid(&self, market: &MarketId) -> Option<MidEntry> {
        self.mids.get(market).map(|e| *e)
    }

    // -------- Inventory ----------

    pub fn get_inventory(&self, market: &MarketId) -> Size {
        self.inventory
            .get(market)
            .map(|v| *v)
            .unwrap_or(Size::ZERO)
    }

    /// Atomic read-modify-write of the signed position.
    pub fn update_inventory(&self, market: &MarketId, delta: Size) -> Size {
        let mut entry = self.inventory.entry(market.clone()).or_insert(Size::ZERO);
        *entry = *entry + delta;
        *entry
    }

    /// Reconcile against an exchange position snapshot.
    ///
    /// A disagreement beyond one lot snaps the store to the exchange
    /// value and suspends maker quoting for `cooldown`. Re-running the
    /// same snapshot is a no-op.
    pub fn reconcile_inventory(
        &self,
        market: &MarketId,
        exchange: Size,
        lot_size: Size,
        cooldown: Duration,
    ) -> ReconcileOutcome {
        let ours = self.get_inventory(market);
        let drift = (ours - exchange).abs();
        if drift <= lot_size.abs() {
            return ReconcileOutcome::InSync;
        }
        warn!(
            market = %market,
            ours = %ours,
            exchange = %exchange,
            "inventory drift beyond lot size; snapping to exchange value"
        );
        self.inventory.insert(market.clone(), exchange);
        self.suspend_maker(cooldown);
        ReconcileOutcome::Snapped { ours, exchange }
    }

    // -------- Orders ----------

    pub fn add_order(&self, order: OpenOrder) {
        self.orders.insert(order.order_id, order);
    }

    pub fn remove_order(&self, order_id: OrderId) -> Option<OpenOrder> {
        self.orders.remove(&order_id).map(|(_, o)| o)
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<OpenOrder> {
        self.orders.get(&order_id).map(|o| o.clone())
    }

    /// Apply a partial fill to a resting order; removes it when exhausted.
    pub fn fill_order(&self, order_id: OrderId, size: Size) {
        let exhausted = match self.orders.get_mut(&order_id) {
            Some(mut o) => o.apply_fill(size),
            None => return,
        };
        if exhausted {
            self.orders.remove(&order_id);
        }
    }

    /// Open orders for a market, optionally filtered by side and role.
    pub fn get_orders(
        &self,
        market: &MarketId,
        side: Option<Side>,
        role: Option<OrderRole>,
    ) -> Vec<OpenOrder> {
        self.orders
            .iter()
            .filter(|o| {
                o.market == *market
                    && side.map_or(true, |s| o.side == s)
                    && role.map_or(true, |r| o.role == r)
            })
            .map(|o| o.clone())
            .collect()
    }

    // -------- Cost basis ----------

    pub fn set_cost_basis(&self, market: &MarketId, basis: CostBasis) {
        self.cost_basis.insert(market.clone(), basis);
    }

    pub fn get_cost_basis(&self, market: &MarketId) -> CostBasis {
        self.cost_basis
            .get(market)
            .map(|b| *b)
            .unwrap_or_default()
    }

    // -------- Heartbeats ----------

    pub fn heartbeat(&self, source: &str) {
        self.heartbeats.insert(source.to_string(), Instant::now());
    }

    /// Age of the last heartbeat, or `None` if the source never beat.
    pub fn heartbeat_age(&self, source: &str) -> Option<Duration> {
        self.heartbeats.get(source).map(|t| t.elapsed())
    }

    // -------- Guard / maker coordination ----------

    pub fn mark_guard_blocked(&self, market: &MarketId) {
        self.guard_blocked_since
            .entry(market.clone())
            .or_insert_with(Instant::now);
    }

    pub fn clear_guard_blocked(&self, market: &MarketId) {
        self.guard_blocked_since.remove(market);
    }

    pub fn guard_blocked_age(&self, market: &MarketId) -> Option<Duration> {
        self.guard_blocked_since.get(market).map(|t| t.elapsed())
    }

    pub fn set_flag(&self, name: &str, value: bool) {
        self.flags.insert(name.to_string(), value);
    }

    pub fn get_flag(&self, name: &str) -> bool {
        self.flags.get(name).map(|v| *v).unwrap_or(false)
    }

    pub fn suspend_maker(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut guard = self.maker_suspended_until.lock();
        let extended = guard.map_or(true, |current| until > current);
        if extended {
            *guard = Some(until);
            info!(seconds = duration.as_secs_f64(), "maker quoting suspended");
        }
    }

    pub fn maker_suspended(&self) -> bool {
        let mut guard = self.maker_suspended_until.lock();
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    // -------- Volume & fee accounting ----------

    pub fn record_fill_volume(&self, role: OrderRole, notional: Decimal, fee: Decimal) {
        let mut stats = self.volume.lock();
        match role {
            OrderRole::Maker => {
                stats.maker_notional += notional.abs();
                stats.maker_fees += fee;
                stats.maker_fills += 1;
            }
            OrderRole::Hedger => {
                stats.hedger_notional += notional.abs();
                stats.hedger_fees += fee;
                stats.hedger_fills += 1;
            }
        }
    }

    pub fn volume_stats(&self) -> VolumeStats {
        self.volume.lock().clone()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::OrderRole;
    use rust_decimal_macros::dec;

    fn mk() -> MarketId {
        MarketId::from("market:2")
    }

    fn order(id: u64, side: Side, role: OrderRole) -> OpenOrder {
        OpenOrder {
            order_id: OrderId(id),
            market: mk(),
            side,
            price: Price::new(dec!(100)),
            size_remaining: Size::new(dec!(0.5)),
            role,
            submitted_at_ms: 0,
        }
    }

    #[test]
    fn test_mid_round_trip() {
        let store = StateStore::new();
        store.set_mid(&mk(), Price::new(dec!(143.00)), 1_700_000_000_000);

        let entry = store.get_mid(&mk()).unwrap();
        assert_eq!(entry.price.inner(), dec!(143.00));
        assert!(!entry.synthetic);
    }

    #[test]
    fn test_synthetic_mid_marked() {
        let store = StateStore::new();
        store.set_synthetic_mid(&mk(), Price::new(dec!(143.00)), 0);
        assert!(store.get_mid(&mk()).unwrap().synthetic);

        // A real frame clears the mark.
        store.set_mid(&mk(), Price::new(dec!(143.10)), 1);
        assert!(!store.get_mid(&mk()).unwrap().synthetic);
    }

    #[test]
    fn test_inventory_update_accumulates() {
        let store = StateStore::new();
        store.update_inventory(&mk(), Size::new(dec!(0.010)));
        store.update_inventory(&mk(), Size::new(dec!(-0.0735)));

        assert_eq!(store.get_inventory(&mk()).inner(), dec!(-0.0635));
    }

    #[test]
    fn test_reconcile_within_lot_is_noop() {
        let store = StateStore::new();
        store.update_inventory(&mk(), Size::new(dec!(0.0101)));

        let outcome = store.reconcile_inventory(
            &mk(),
            Size::new(dec!(0.0100)),
            Size::new(dec!(0.0001)),
            Duration::from_secs(30),
        );
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert_eq!(store.get_inventory(&mk()).inner(), dec!(0.0101));
        assert!(!store.maker_suspended());
    }

    #[test]
    fn test_reconcile_snaps_and_suspends() {
        let store = StateStore::new();
        store.update_inventory(&mk(), Size::new(dec!(0.02)));

        let outcome = store.reconcile_inventory(
            &mk(),
            Size::new(dec!(0.01)),
            Size::new(dec!(0.0001)),
            Duration::from_secs(30),
        );
        assert_eq!(
            outcome,
            ReconcileOutcome::Snapped {
                ours: Size::new(dec!(0.02)),
                exchange: Size::new(dec!(0.01)),
            }
        );
        assert_eq!(store.get_inventory(&mk()).inner(), dec!(0.01));
        assert!(store.maker_suspended());

        // Immediately reconciling the same snapshot again is a no-op.
        let again = store.reconcile_inventory(
            &mk(),
            Size::new(dec!(0.01)),
            Size::new(dec!(0.0001)),
            Duration::from_secs(30),
        );
        assert_eq!(again, ReconcileOutcome::InSync);
    }

    #[test]
    fn test_order_filters() {
        let store = StateStore::new();
        store.add_order(order(1, Side::Bid, OrderRole::Maker));
        store.add_order(order(2, Side::Ask, OrderRole::Maker));
        store.add_order(order(3, Side::Ask, OrderRole::Hedger));

        assert_eq!(store.get_orders(&mk(), None, None).len(), 3);
        assert_eq!(store.get_orders(&mk(), Some(Side::Ask), None).len(), 2);
        assert_eq!(
            store
                .get_orders(&mk(), Some(Side::Ask), Some(OrderRole::Hedger))
                .len(),
            1
        );
    }

    #[test]
    fn test_fill_order_partial_then_exhausted() {
        let store = StateStore::new();
        store.add_order(order(7, Side::Bid, OrderRole::Maker));

        store.fill_order(OrderId(7), Size::new(dec!(0.2)));
        assert_eq!(
            store.get_order(OrderId(7)).unwrap().size_remaining.inner(),
            dec!(0.3)
        );

        store.fill_order(OrderId(7), Size::new(dec!(0.3)));
        assert!(store.get_order(OrderId(7)).is_none());
    }

    #[test]
    fn test_heartbeat_age() {
        let store = StateStore::new();
        assert!(store.heartbeat_age("ws").is_none());

        store.heartbeat("ws");
        assert!(store.heartbeat_age("ws").unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn test_guard_block_tracking() {
        let store = StateStore::new();
        assert!(store.guard_blocked_age(&mk()).is_none());

        store.mark_guard_blocked(&mk());
        assert!(store.guard_blocked_age(&mk()).is_some());

        store.clear_guard_blocked(&mk());
        assert!(store.guard_blocked_age(&mk()).is_none());
    }

    #[test]
    fn test_maker_suspension_expires() {
        let store = StateStore::new();
        store.suspend_maker(Duration::from_millis(0));
        assert!(!store.maker_suspended());
    }

    #[test]
    fn test_volume_accounting() {
        let store = StateStore::new();
        store.record_fill_volume(OrderRole::Maker, dec!(10.5), dec!(0.002));
        store.record_fill_volume(OrderRole::Hedger, dec!(-8.0), dec!(0.004));

        let stats = store.volume_stats();
        assert_eq!(stats.maker_notional, dec!(10.5));
        assert_eq!(stats.hedger_notional, dec!(8.0));
        assert_eq!(stats.maker_fills, 1);
        assert_eq!(stats.hedger_fills, 1);
    }
}
