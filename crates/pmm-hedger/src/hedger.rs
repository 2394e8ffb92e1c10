//! The hedger state machine.
//!
//! Idle until |inventory| crosses the trigger. A passive leg rests at a
//! favorable offset hoping for a maker fill; on timeout an aggressive
//! leg crosses the book, capped by max slippage. A guard latch or a
//! sustained maker block escalates straight to emergency-flatten with
//! a larger clip and extra cross. Every executed clip is followed by a
//! cooldown.

use crate::clip::{size_clip, ClipDecision, ClipInputs};
use crate::config::HedgerConfig;
use pmm_core::{
    EventBus, EventKind, InFlightTable, MarketId, MarketSpec, OpenOrder, OrderRole, Price, Side,
    Size, TradingClient,
};
use pmm_guard::{Guard, OrderRequest};
use pmm_state::{StateStore, PNL_GUARD_FLAG};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Heartbeat source name for the hedger loop.
pub const HEDGE_HEARTBEAT: &str = "hedge";

/// Hedger lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgerState {
    Idle,
    Passive,
    Aggressive,
    Cooldown,
    EmergencyFlatten,
}

impl fmt::Display for HedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Passive => "passive",
            Self::Aggressive => "aggressive",
            Self::Cooldown => "cooldown",
            Self::EmergencyFlatten => "emergency_flatten",
        };
        write!(f, "{s}")
    }
}

/// Inventory-flattening executor for one market.
pub struct Hedger {
    config: HedgerConfig,
    market: MarketId,
    spec: MarketSpec,
    store: Arc<StateStore>,
    guard: Arc<Guard>,
    client: Arc<dyn TradingClient>,
    events: Arc<EventBus>,
    in_flight: InFlightTable,
    fill_wake: Arc<Notify>,
    shutdown: CancellationToken,
    state: HedgerState,
    cooldown_until: Option<Instant>,
    /// Cycles skipped because no clip satisfied the exchange minima
    /// without over-hedging.
    yield_count: u64,
}

impl Hedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HedgerConfig,
        market: MarketId,
        spec: MarketSpec,
        store: Arc<StateStore>,
        guard: Arc<Guard>,
        client: Arc<dyn TradingClient>,
        events: Arc<EventBus>,
        fill_wake: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            market,
            spec,
            store,
            guard,
            client,
            events,
            in_flight: InFlightTable::new(),
            fill_wake,
            shutdown,
            state: HedgerState::Idle,
            cooldown_until: None,
            yield_count: 0,
        }
    }

    pub fn state(&self) -> HedgerState {
        self.state
    }

    pub fn yield_count(&self) -> u64 {
        self.yield_count
    }

    /// Run until shutdown. Fills wake the loop immediately; otherwise
    /// it polls on the configured interval. In-flight hedge legs are
    /// allowed to complete on shutdown (flattening is never canceled).
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!(market = %self.market, "hedger disabled via config");
            return;
        }
        info!(market = %self.market, "hedger starting");
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(poll) => {}
                () = self.fill_wake.notified() => {}
            }
            self.evaluate().await;
        }
        info!(market = %self.market, "hedger stopped");
    }

    /// One evaluation pass. Public so tests can step deterministically.
    pub async fn evaluate(&mut self) {
        let now = Instant::now();
        if let Some(until) = self.cooldown_until {
            if now < until {
                debug!(
                    market = %self.market,
                    remaining_s = (until - now).as_secs_f64(),
                    "cooling down"
                );
                return;
            }
            self.cooldown_until = None;
            self.set_state(HedgerState::Idle);
        }

        let inventory = self.store.get_inventory(&self.market);
        let abs_inv = inventory.abs();
        let entry = match self.store.get_mid(&self.market) {
            Some(e) => e,
            None => {
                debug!(market = %self.market, "no mid; skipping evaluation");
                return;
            }
        };
        if entry.synthetic {
            debug!(market = %self.market, "synthetic mid; not hedging");
            return;
        }
        let mid = entry.price;

        if !self.triggered(abs_inv, mid) {
            if self.state != HedgerState::Idle {
                self.set_state(HedgerState::Idle);
            }
            return;
        }

        // Single-leg discipline: one resting hedger order per market.
        if !self
            .store
            .get_orders(&self.market, None, Some(OrderRole::Hedger))
            .is_empty()
        {
            debug!(market = %self.market, "hedger order already resting");
            return;
        }

        let emergency = self.emergency_active();
        let pnl_guard_active = self.store.get_flag(PNL_GUARD_FLAG);

        let inputs = ClipInputs {
            abs_inventory: abs_inv,
            target_units: Size::new(self.config.target_units),
            max_clip_units: Size::new(self.config.max_clip_units),
            guard_multiplier: pnl_guard_active.then_some(self.config.guard_clip_multiplier),
            emergency_multiplier: emergency.then_some(self.config.emergency_clip_multiplier),
        };
        let clip = match size_clip(&inputs, &self.spec, mid) {
            ClipDecision::Clip(clip) => clip,
            ClipDecision::Yield => {
                self.yield_count += 1;
                warn!(
                    market = %self.market,
                    inventory = %inventory,
                    yields = self.yield_count,
                    "no clip satisfies exchange minima without over-hedging; yielding"
                );
                return;
            }
        };

        let side = Side::flattening(inventory);
        let executed = if emergency {
            self.set_state(HedgerState::EmergencyFlatten);
            let offset = (self.config.aggressive_offset_bps + self.config.emergency_extra_bps)
                .min(self.config.max_slippage_bps);
            self.aggressive_leg(side, clip, mid, offset).await
        } else {
            self.set_state(HedgerState::Passive);
            match self.passive_leg(side, clip, mid, abs_inv).await {
                PassiveOutcome::Filled => true,
                PassiveOutcome::Blocked => false,
                PassiveOutcome::TimedOut => {
                    self.set_state(HedgerState::Aggressive);
                    let offset = self
                        .config
                        .aggressive_offset_bps
                        .min(self.config.max_slippage_bps);
                    self.aggressive_leg(side, clip, mid, offset).await
                }
            }
        };

        if executed {
            self.store.heartbeat(HEDGE_HEARTBEAT);
        }
        let cooldown = if emergency {
            self.config.emergency_cooldown_ms
        } else {
            self.config.cooldown_ms
        };
        self.cooldown_until = Some(Instant::now() + Duration::from_millis(cooldown));
        self.set_state(HedgerState::Cooldown);
    }

    fn triggered(&self, abs_inv: Size, mid: Price) -> bool {
        if abs_inv.inner() > self.config.trigger_units {
            return true;
        }
        match self.config.trigger_notional {
            Some(notional_trigger) => abs_inv.notional(mid) > notional_trigger,
            None => false,
        }
    }

    fn emergency_active(&self) -> bool {
        if self.guard.latch().is_latched() {
            return true;
        }
        self.store
            .guard_blocked_age(&self.market)
            .is_some_and(|age| age >= Duration::from_millis(self.config.emergency_block_ms))
    }

    /// Rest a post-only order at the passive offset and wait for the
    /// fill to show up in inventory.
    async fn passive_leg(
        &mut self,
        side: Side,
        clip: Size,
        mid: Price,
        start_abs: Size,
    ) -> PassiveOutcome {
        let tick = self.spec.tick_size();
        let offset = mid.inner() * self.config.passive_offset_bps / Decimal::from(10_000);
        let price = match side {
            // Rest on the favorable side of mid.
            Side::Ask => Price::new(mid.inner() + offset).ceil_to_tick(tick),
            Side::Bid => Price::new(mid.inner() - offset).floor_to_tick(tick),
        };

        // A resting maker order at-or-inside the target will do the
        // flattening for us; do not duplicate it.
        let makers = self
            .store
            .get_orders(&self.market, Some(side), Some(OrderRole::Maker));
        let covered = makers.iter().any(|o| match side {
            Side::Ask => o.price <= price,
            Side::Bid => o.price >= price,
        });
        if covered {
            debug!(market = %self.market, "maker order already covers the flatten; waiting");
            return PassiveOutcome::Blocked;
        }

        let Some(order_id) = self.submit(side, price, clip, true).await else {
            return PassiveOutcome::Blocked;
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.passive_wait_ms);
        let poll = Duration::from_millis(self.config.passive_poll_ms.max(10));
        while Instant::now() < deadline && !self.shutdown.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(poll.min(remaining)).await;
            let current_abs = self.store.get_inventory(&self.market).abs();
            let done = !self.triggered(current_abs, mid)
                || (start_abs - current_abs).inner()
                    >= clip.inner() * rust_decimal_macros::dec!(0.6);
            if done {
                info!(market = %self.market, order_id = %order_id, "passive hedge filled");
                if let Err(e) = self.client.cancel(&self.market, order_id).await {
                    debug!(error = %e, "passive remainder cancel failed");
                }
                self.store.remove_order(order_id);
                return PassiveOutcome::Filled;
            }
        }

        debug!(market = %self.market, "passive hedge timed out; escalating");
        if let Err(e) = self.client.cancel(&self.market, order_id).await {
            debug!(error = %e, "passive cancel failed");
        }
        self.store.remove_order(order_id);
        PassiveOutcome::TimedOut
    }

    /// Cross the book by `offset_bps` to take liquidity.
    async fn aggressive_leg(
        &mut self,
        side: Side,
        clip: Size,
        mid: Price,
        offset_bps: Decimal,
    ) -> bool {
        let tick = self.spec.tick_size();
        let offset = mid.inner() * offset_bps / Decimal::from(10_000);
        let price = match side {
            // Cross through the mid to get taken.
            Side::Ask => Price::new(mid.inner() - offset).floor_to_tick(tick),
            Side::Bid => Price::new(mid.inner() + offset).ceil_to_tick(tick),
        };
        self.submit(side, price, clip, false).await.is_some()
    }

    async fn submit(
        &mut self,
        side: Side,
        price: Price,
        size: Size,
        post_only: bool,
    ) -> Option<pmm_core::OrderId> {
        let request = OrderRequest {
            market: self.market.clone(),
            side,
            price,
            size,
            role: OrderRole::Hedger,
        };
        if self.guard.validate(&request).is_err() {
            return None;
        }

        let _slot = self
            .in_flight
            .try_acquire(&self.market, side, OrderRole::Hedger)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.events.emit(EventKind::OrderSubmit {
                market: self.market.clone(),
                side,
                role: OrderRole::Hedger,
                price,
                size,
            });
            match self
                .client
                .submit_limit(&self.market, side, price, size, post_only, OrderRole::Hedger)
                .await
            {
                Ok(order_id) => {
                    self.store.add_order(OpenOrder {
                        order_id,
                        market: self.market.clone(),
                        side,
                        price,
                        size_remaining: size,
                        role: OrderRole::Hedger,
                        submitted_at_ms: unix_millis(),
                    });
                    self.events.emit(EventKind::OrderAck {
                        market: self.market.clone(),
                        order_id,
                        side,
                        role: OrderRole::Hedger,
                    });
                    return Some(order_id);
                }
                Err(e) if attempt < self.config.max_attempts => {
                    warn!(market = %self.market, attempt, error = %e, "hedge submit failed; retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(e) => {
                    warn!(market = %self.market, error = %e, "hedge attempts exhausted");
                    self.events.emit(EventKind::OrderReject {
                        market: self.market.clone(),
                        side,
                        role: OrderRole::Hedger,
                        reason: e.kind.to_string(),
                    });
                    return None;
                }
            }
        }
    }

    fn set_state(&mut self, next: HedgerState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        info!(market = %self.market, from = %from, to = %next, "hedger state change");
        self.events.emit(EventKind::HedgerStateChange {
            market: self.market.clone(),
            from: from.to_string(),
            to: next.to_string(),
        });
    }
}

enum PassiveOutcome {
    Filled,
    TimedOut,
    /// Guard rejection, duplicate coverage, or submit failure; nothing
    /// rested.
    Blocked,
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pmm_core::{CancelAck, OrderId, SubmitError};
    use pmm_guard::{GuardConfig, KillSwitchLatch, LatchReason};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingClient {
        next_id: AtomicU64,
        submissions: Mutex<Vec<(Side, Price, Size, bool)>>,
        cancels: Mutex<Vec<OrderId>>,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1),
                submissions: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TradingClient for RecordingClient {
        async fn submit_limit(
            &self,
            _market: &MarketId,
            side: Side,
            price: Price,
            size: Size,
            post_only: bool,
            _role: OrderRole,
        ) -> Result<OrderId, SubmitError> {
            self.submissions.lock().push((side, price, size, post_only));
            Ok(OrderId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn cancel(
            &self,
            _market: &MarketId,
            order_id: OrderId,
        ) -> Result<CancelAck, SubmitError> {
            self.cancels.lock().push(order_id);
            Ok(CancelAck::Canceled)
        }

        async fn cancel_all(&self, _market: &MarketId) -> Result<usize, SubmitError> {
            Ok(0)
        }
    }

    fn mk() -> MarketId {
        MarketId::from("market:2")
    }

    struct Fixture {
        hedger: Hedger,
        store: Arc<StateStore>,
        client: Arc<RecordingClient>,
        latch: Arc<KillSwitchLatch>,
    }

    fn fixture(config: HedgerConfig, spec: MarketSpec) -> Fixture {
        let store = Arc::new(StateStore::new());
        let latch = Arc::new(KillSwitchLatch::new());
        let mut specs = HashMap::new();
        specs.insert(mk(), spec.clone());
        let guard = Arc::new(Guard::new(
            GuardConfig {
                max_position_units: Size::new(dec!(5)),
                max_inventory_notional: dec!(100000),
                ..Default::default()
            },
            store.clone(),
            specs,
            latch.clone(),
            Arc::new(EventBus::default()),
        ));
        let client = Arc::new(RecordingClient::new());
        let hedger = Hedger::new(
            config,
            mk(),
            spec,
            store.clone(),
            guard,
            client.clone(),
            Arc::new(EventBus::default()),
            Arc::new(Notify::new()),
            CancellationToken::new(),
        );
        Fixture {
            hedger,
            store,
            client,
            latch,
        }
    }

    fn fast_config() -> HedgerConfig {
        HedgerConfig {
            enabled: true,
            trigger_units: dec!(0.05),
            target_units: dec!(0),
            max_clip_units: dec!(0.05),
            passive_wait_ms: 200,
            passive_poll_ms: 20,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn loose_spec() -> MarketSpec {
        MarketSpec::new(100, 10_000, Size::new(dec!(0.001)), dec!(1))
    }

    #[tokio::test]
    async fn test_idle_below_trigger() {
        let mut fx = fixture(fast_config(), loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.01)));

        fx.hedger.evaluate().await;

        assert!(fx.client.submissions.lock().is_empty());
        assert_eq!(fx.hedger.state(), HedgerState::Idle);
    }

    #[tokio::test]
    async fn test_minima_cap_conflict_yields() {
        // inv +0.010 against min_size 0.061 and min_notional 10.5 at
        // mid 143.00: the round-up would over-hedge past flat, so
        // nothing is submitted and the counter bumps.
        let config = HedgerConfig {
            enabled: true,
            trigger_units: dec!(0.008),
            target_units: dec!(0.0005),
            max_clip_units: dec!(0.05),
            ..fast_config()
        };
        let spec = MarketSpec::new(100, 10_000, Size::new(dec!(0.061)), dec!(10.5));
        let mut fx = fixture(config, spec);
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.010)));

        fx.hedger.evaluate().await;

        assert!(fx.client.submissions.lock().is_empty());
        assert_eq!(fx.hedger.yield_count(), 1);
    }

    #[tokio::test]
    async fn test_passive_fill_enters_cooldown() {
        let mut fx = fixture(fast_config(), loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.10)));

        // Simulate the passive fill landing mid-wait.
        let store = fx.store.clone();
        let fill = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.update_inventory(&mk(), Size::new(dec!(-0.08)));
        });

        fx.hedger.evaluate().await;
        fill.await.unwrap();

        let submissions = fx.client.submissions.lock().clone();
        assert_eq!(submissions.len(), 1);
        let (side, price, size, post_only) = submissions[0];
        assert_eq!(side, Side::Ask);
        assert!(post_only, "passive leg must be post-only");
        // Resting above mid at the passive offset.
        assert!(price > Price::new(dec!(143.00)));
        assert_eq!(size.inner(), dec!(0.05));
        assert_eq!(fx.hedger.state(), HedgerState::Cooldown);

        // Cooldown gates the next evaluation.
        fx.hedger.evaluate().await;
        assert_eq!(fx.client.submissions.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_passive_timeout_escalates_to_aggressive() {
        let mut fx = fixture(fast_config(), loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.10)));

        fx.hedger.evaluate().await;

        let submissions = fx.client.submissions.lock().clone();
        assert_eq!(submissions.len(), 2, "passive then aggressive");
        let (_, passive_price, _, passive_post_only) = submissions[0];
        let (side, aggressive_price, _, aggressive_post_only) = submissions[1];
        assert!(passive_post_only);
        assert!(!aggressive_post_only);
        assert_eq!(side, Side::Ask);
        // The aggressive ask crosses below mid; the passive rested above.
        assert!(passive_price > Price::new(dec!(143.00)));
        assert!(aggressive_price < Price::new(dec!(143.00)));
        // The timed-out passive leg was canceled.
        assert_eq!(fx.client.cancels.lock().len(), 1);
        assert_eq!(fx.hedger.state(), HedgerState::Cooldown);
    }

    #[tokio::test]
    async fn test_short_inventory_hedges_with_bid() {
        let mut fx = fixture(fast_config(), loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(-0.10)));

        let store = fx.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.update_inventory(&mk(), Size::new(dec!(0.08)));
        });

        fx.hedger.evaluate().await;

        let submissions = fx.client.submissions.lock().clone();
        assert_eq!(submissions[0].0, Side::Bid);
        assert!(submissions[0].1 < Price::new(dec!(143.00)));
    }

    #[tokio::test]
    async fn test_latch_escalates_to_emergency_flatten() {
        let config = HedgerConfig {
            emergency_cooldown_ms: 50,
            ..fast_config()
        };
        let mut fx = fixture(config, loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.10)));
        fx.latch.trigger(LatchReason::Manual {
            message: "test".to_string(),
        });

        fx.hedger.evaluate().await;

        // Emergency skips the passive leg entirely.
        let submissions = fx.client.submissions.lock().clone();
        assert_eq!(submissions.len(), 1);
        let (side, price, size, post_only) = submissions[0];
        assert_eq!(side, Side::Ask);
        assert!(!post_only);
        assert!(price < Price::new(dec!(143.00)));
        // Emergency clip: 0.05 * 1.2 = 0.06.
        assert_eq!(size.inner(), dec!(0.06));
        assert_eq!(fx.hedger.state(), HedgerState::Cooldown);
    }

    #[tokio::test]
    async fn test_resting_maker_order_suppresses_duplicate() {
        let mut fx = fixture(fast_config(), loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.10)));
        // Maker ask resting at the passive target already flattens.
        fx.store.add_order(OpenOrder {
            order_id: OrderId(99),
            market: mk(),
            side: Side::Ask,
            price: Price::new(dec!(143.02)),
            size_remaining: Size::new(dec!(0.05)),
            role: OrderRole::Maker,
            submitted_at_ms: 0,
        });

        fx.hedger.evaluate().await;

        assert!(fx.client.submissions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_synthetic_mid_blocks_hedging() {
        let mut fx = fixture(fast_config(), loose_spec());
        fx.store
            .set_synthetic_mid(&mk(), Price::new(dec!(143.00)), 1);
        fx.store.update_inventory(&mk(), Size::new(dec!(0.10)));

        fx.hedger.evaluate().await;
        assert!(fx.client.submissions.lock().is_empty());
    }

    #[tokio::test]
    async fn test_notional_trigger() {
        let config = HedgerConfig {
            trigger_units: dec!(10), // units alone would not trigger
            trigger_notional: Some(dec!(5)),
            ..fast_config()
        };
        let mut fx = fixture(config, loose_spec());
        fx.store.set_mid(&mk(), Price::new(dec!(143.00)), 1);
        // 0.06 * 143 = 8.58 notional > 5.
        fx.store.update_inventory(&mk(), Size::new(dec!(0.06)));

        let store = fx.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.update_inventory(&mk(), Size::new(dec!(-0.06)));
        });
        fx.hedger.evaluate().await;

        assert!(!fx.client.submissions.lock().is_empty());
    }
}
