//! The quote cycle.
//!
//! Per market, per refresh: read a consistent snapshot, run the feature
//! chain, form the quote, and submit each ungated side through the
//! guard. Sticky quotes avoid churning the book; the cancel throttle
//! bounds replace rate; every outcome becomes an event.

use crate::config::MakerConfig;
use crate::features::{self, compose, Feature, QuoteContext, StateChange};
use crate::quote::{build_plan, QuotePlan};
use crate::throttle::CancelThrottle;
use parking_lot::Mutex;
use pmm_core::{
    EventBus, EventKind, InFlightTable, MarketId, MarketSpec, OpenOrder, OrderRole, Price, Side,
    Size, SubmitErrorKind, SubmitOutcome, TradingClient,
};
use pmm_guard::{Guard, LatchReason, OrderRequest};
use pmm_ledger::PnlCompositor;
use pmm_state::{StateStore, PNL_GUARD_FLAG};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Heartbeat source name for the quote loop.
pub const QUOTE_HEARTBEAT: &str = "quote";

/// Two-sided quoting engine.
pub struct MakerEngine {
    config: MakerConfig,
    markets: Vec<(MarketId, MarketSpec)>,
    store: Arc<StateStore>,
    guard: Arc<Guard>,
    client: Arc<dyn TradingClient>,
    compositor: Arc<Mutex<PnlCompositor>>,
    events: Arc<EventBus>,
    in_flight: InFlightTable,
    throttle: CancelThrottle,
    features: Vec<Box<dyn Feature>>,
    generation: u64,
    shutdown: CancellationToken,
}

impl MakerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MakerConfig,
        markets: Vec<(MarketId, MarketSpec)>,
        store: Arc<StateStore>,
        guard: Arc<Guard>,
        client: Arc<dyn TradingClient>,
        compositor: Arc<Mutex<PnlCompositor>>,
        events: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        let throttle = CancelThrottle::new(
            config.max_cancels_per_minute,
            Duration::from_secs(60),
        );
        let features = features::build(&config);
        Self {
            config,
            markets,
            store,
            guard,
            client,
            compositor,
            events,
            in_flight: InFlightTable::new(),
            throttle,
            features,
            generation: 0,
            shutdown,
        }
    }

    /// Run until shutdown, then cancel all resting maker orders.
    pub async fn run(mut self) {
        info!(markets = self.markets.len(), "maker engine starting");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.refresh_delay()) => {}
            }
            for idx in 0..self.markets.len() {
                self.run_cycle(idx).await;
            }
        }
        self.cancel_all_on_shutdown().await;
        info!("maker engine stopped");
    }

    fn refresh_delay(&self) -> Duration {
        let base = self.config.refresh_interval_ms as f64 / 1000.0;
        let jitter = self.config.refresh_jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((base * factor).max(0.05))
    }

    /// One quote cycle for `markets[idx]`. Public so tests can step the
    /// engine deterministically.
    pub async fn run_cycle(&mut self, idx: usize) {
        let (market, spec) = self.markets[idx].clone();
        self.generation += 1;

        if !self.config.enabled
            || self.store.maker_suspended()
            || self.store.get_flag(pmm_state::LEDGER_DEGRADED_FLAG)
        {
            debug!(market = %market, "maker suspended; skipping cycle");
            self.finish_cycle(&market, None);
            return;
        }

        let Some(entry) = self.store.get_mid(&market) else {
            debug!(market = %market, "no mid yet");
            self.finish_cycle(&market, None);
            return;
        };
        let mid_age = entry.age();
        if entry.synthetic || mid_age > Duration::from_millis(self.config.mid_max_age_ms) {
            debug!(
                market = %market,
                synthetic = entry.synthetic,
                age_s = mid_age.as_secs_f64(),
                "mid unusable; skipping cycle"
            );
            self.finish_cycle(&market, None);
            return;
        }

        // Consistent snapshot for the whole cycle.
        let mid = entry.price;
        let inventory = self.store.get_inventory(&market);
        let now = Instant::now();

        // Feed features, then collect their contributions.
        let windowed = self.windowed_pnl(&market);
        for feature in &mut self.features {
            feature.update(&StateChange::Mid { mid, at: now });
            feature.update(&StateChange::WindowedPnl { realized: windowed });
        }
        let ctx = QuoteContext {
            mid,
            inventory,
            inventory_soft_cap: Size::new(self.config.inventory_soft_cap),
            base_spread_bps: self.config.base_spread_bps,
            now,
        };
        let adjustments: Vec<_> = self
            .features
            .iter_mut()
            .map(|f| f.adjust(&ctx))
            .collect();
        let composed = compose(&adjustments);
        for feature in &mut self.features {
            feature.update(&StateChange::Signals(composed.signals.clone()));
        }
        self.store
            .set_flag(PNL_GUARD_FLAG, composed.signals.pnl_guard_active);

        // Effective spread: floored base + deltas, plus jitter.
        let spread = (self.config.base_spread_bps + self.spread_jitter()
            + composed.spread_delta_bps)
            .max(self.config.min_spread_bps);

        // Size interpolates down as inventory approaches the soft cap,
        // then takes the composed multiplier.
        let raw_size = self.interpolated_size(inventory) * composed.size_multiplier;

        let Some(plan) = build_plan(
            mid,
            spread,
            Size::new(raw_size),
            &spec,
            Size::new(self.config.max_clip_size),
            composed.gates,
            self.generation,
        ) else {
            warn!(market = %market, "notional floor exceeds clip cap; aborting market this cycle");
            self.finish_cycle(&market, None);
            return;
        };

        if plan.is_empty() {
            debug!(market = %market, "both sides gated");
            self.cancel_maker_orders(&market).await;
            self.finish_cycle(&market, Some(&plan));
            return;
        }

        let mut attempted = 0u32;
        let mut guard_rejected = 0u32;
        if let Some((price, size)) = plan.bid {
            attempted += 1;
            let outcome = self.place_side(&market, Side::Bid, price, size).await;
            if matches!(outcome, SubmitOutcome::Skipped { ref reason } if reason == "guard") {
                guard_rejected += 1;
            }
        }
        if let Some((price, size)) = plan.ask {
            attempted += 1;
            let outcome = self.place_side(&market, Side::Ask, price, size).await;
            if matches!(outcome, SubmitOutcome::Skipped { ref reason } if reason == "guard") {
                guard_rejected += 1;
            }
        }

        // Track sustained guard blocks for the hedger's emergency timer.
        if attempted > 0 && guard_rejected == attempted {
            self.store.mark_guard_blocked(&market);
        } else if attempted > 0 {
            self.store.clear_guard_blocked(&market);
        }

        self.finish_cycle(&market, Some(&plan));
    }

    async fn place_side(
        &mut self,
        market: &MarketId,
        side: Side,
        price: Price,
        size: Size,
    ) -> SubmitOutcome {
        let request = OrderRequest {
            market: market.clone(),
            side,
            price,
            size,
            role: OrderRole::Maker,
        };
        if self.guard.validate(&request).is_err() {
            // Guard already counted, logged and possibly latched.
            return SubmitOutcome::Skipped {
                reason: "guard".to_string(),
            };
        }

        // Sticky quote: an existing order close enough is left alone.
        let existing = self
            .store
            .get_orders(market, Some(side), Some(OrderRole::Maker));
        let resting = existing.first();
        if let Some(order) = resting {
            if self.is_sticky(order, price, size) {
                debug!(market = %market, side = %side, "sticky quote; keeping resting order");
                return SubmitOutcome::Skipped {
                    reason: "sticky".to_string(),
                };
            }
        }

        let Some(_slot) = self.in_flight.try_acquire(market, side, OrderRole::Maker) else {
            return SubmitOutcome::Skipped {
                reason: "in-flight".to_string(),
            };
        };

        // Replace path: cancel the stale order first, throttle-checked.
        if let Some(order) = resting {
            let now = Instant::now();
            if self.throttle.is_throttled(now) {
                debug!(market = %market, side = %side, "cancel throttled; keeping stale quote");
                return SubmitOutcome::Throttled;
            }
            if let Err(e) = self.client.cancel(market, order.order_id).await {
                warn!(market = %market, order_id = %order.order_id, error = %e, "cancel failed");
                return SubmitOutcome::Skipped {
                    reason: "cancel-failed".to_string(),
                };
            }
            self.store.remove_order(order.order_id);
            self.throttle.record(now);
        }

        self.submit_with_retry(market, side, price, size).await
    }

    async fn submit_with_retry(
        &mut self,
        market: &MarketId,
        side: Side,
        price: Price,
        size: Size,
    ) -> SubmitOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.events.emit(EventKind::OrderSubmit {
                market: market.clone(),
                side,
                role: OrderRole::Maker,
                price,
                size,
            });
            match self
                .client
                .submit_limit(market, side, price, size, true, OrderRole::Maker)
                .await
            {
                Ok(order_id) => {
                    self.store.add_order(OpenOrder {
                        order_id,
                        market: market.clone(),
                        side,
                        price,
                        size_remaining: size,
                        role: OrderRole::Maker,
                        submitted_at_ms: unix_millis(),
                    });
                    self.events.emit(EventKind::OrderAck {
                        market: market.clone(),
                        order_id,
                        side,
                        role: OrderRole::Maker,
                    });
                    return SubmitOutcome::Submitted(order_id);
                }
                Err(e) if e.kind.is_transient() && attempt < self.config.max_attempts => {
                    warn!(market = %market, side = %side, attempt, error = %e, "transient submit failure");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
                Err(e) => {
                    warn!(market = %market, side = %side, error = %e, "submit rejected");
                    self.events.emit(EventKind::OrderReject {
                        market: market.clone(),
                        side,
                        role: OrderRole::Maker,
                        reason: e.kind.to_string(),
                    });
                    if e.kind == SubmitErrorKind::Crossed
                        && self.guard.config().kill_on_crossed_book
                    {
                        self.guard.latch().trigger(LatchReason::CrossedBook {
                            market: market.clone(),
                        });
                    }
                    return SubmitOutcome::Rejected(e.kind);
                }
            }
        }
    }

    /// Cancel every resting maker order on the market, respecting the
    /// throttle.
    async fn cancel_maker_orders(&mut self, market: &MarketId) {
        for order in self
            .store
            .get_orders(market, None, Some(OrderRole::Maker))
        {
            let now = Instant::now();
            if self.throttle.is_throttled(now) {
                debug!(market = %market, "cancel throttled; leaving remaining orders");
                return;
            }
            if self.client.cancel(market, order.order_id).await.is_ok() {
                self.store.remove_order(order.order_id);
                self.throttle.record(now);
            }
        }
    }

    async fn cancel_all_on_shutdown(&mut self) {
        for (market, _) in self.markets.clone() {
            match self.client.cancel_all(&market).await {
                Ok(count) => info!(market = %market, count, "canceled maker orders on shutdown"),
                Err(e) => warn!(market = %market, error = %e, "shutdown cancel_all failed"),
            }
            for order in self
                .store
                .get_orders(&market, None, Some(OrderRole::Maker))
            {
                self.store.remove_order(order.order_id);
            }
        }
    }

    fn finish_cycle(&mut self, market: &MarketId, plan: Option<&QuotePlan>) {
        self.store.heartbeat(QUOTE_HEARTBEAT);
        let (bid, ask, spread_bps) = match plan {
            Some(p) => (
                p.bid.map(|(price, _)| price),
                p.ask.map(|(price, _)| price),
                p.spread_bps,
            ),
            None => (None, None, Decimal::ZERO),
        };
        self.events.emit(EventKind::MakerCycle {
            market: market.clone(),
            bid,
            ask,
            spread_bps,
        });
    }

    fn windowed_pnl(&self, market: &MarketId) -> Decimal {
        let now_ms = unix_millis();
        let start = now_ms.saturating_sub(self.config.pnl_window_ms as i64);
        self.compositor
            .lock()
            .realized_in_window(market, start, now_ms)
    }

    fn spread_jitter(&self) -> Decimal {
        if self.config.randomize_bps <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let amplitude = self.config.randomize_bps;
        let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        amplitude * Decimal::from_f64(unit).unwrap_or(Decimal::ZERO)
    }

    /// Quote size shrinks from `size_max` toward `size_min` as |inv|
    /// approaches the soft cap.
    fn interpolated_size(&self, inventory: Size) -> Decimal {
        let min = self.config.resolved_size_min();
        let max = self.config.resolved_size_max();
        let cap = self.config.inventory_soft_cap;
        if cap <= Decimal::ZERO {
            return self.config.base_size;
        }
        let ratio = (inventory.abs().inner() / cap).min(Decimal::ONE);
        max - (max - min) * ratio
    }

    fn is_sticky(&self, order: &OpenOrder, price: Price, size: Size) -> bool {
        let price_eps = price.inner() * self.config.price_epsilon_bps / Decimal::from(10_000);
        let size_eps = size.inner() * self.config.size_epsilon_ratio;
        (order.price.inner() - price.inner()).abs() <= price_eps
            && (order.size_remaining.inner() - size.inner()).abs() <= size_eps
    }
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
    use pmm_core::{CancelAck, OrderId, SubmitError};
    use pmm_guard::{GuardConfig, KillSwitchLatch};
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingClient {
        next_id: AtomicU64,
        submissions: Mutex<Vec<(Side, Price, Size)>>,
        cancels: Mutex<Vec<OrderId>>,
        /// Scripted submit responses; exhausted -> Ok.
        script: Mutex<VecDeque<Result<(), SubmitError>>>,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self {
                next_id: AtomicU64::new(1),
                submissions: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
                script: Mutex::new(VecDeque::new()),
            }
        }

        fn scripted(responses: Vec<Result<(), SubmitError>>) -> Self {
            let client = Self::new();
            *client.script.lock() = responses.into();
            client
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
            _post_only: bool,
            _role: OrderRole,
        ) -> Result<OrderId, SubmitError> {
            self.submissions.lock().push((side, price, size));
            if let Some(response) = self.script.lock().pop_front() {
                response?;
            }
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

    fn spec() -> MarketSpec {
        MarketSpec::new(100, 10_000, Size::new(dec!(0.001)), dec!(5))
    }

    struct Fixture {
        engine: MakerEngine,
        store: Arc<StateStore>,
        client: Arc<RecordingClient>,
        latch: Arc<KillSwitchLatch>,
    }

    fn fixture_with(client: RecordingClient, config: MakerConfig) -> Fixture {
        let store = Arc::new(StateStore::new());
        let latch = Arc::new(KillSwitchLatch::new());
        let mut specs = HashMap::new();
        specs.insert(mk(), spec());
        let guard = Arc::new(Guard::new(
            GuardConfig::default(),
            store.clone(),
            specs,
            latch.clone(),
            Arc::new(EventBus::default()),
        ));
        let client = Arc::new(client);
        let engine = MakerEngine::new(
            config,
            vec![(mk(), spec())],
            store.clone(),
            guard,
            client.clone(),
            Arc::new(Mutex::new(PnlCompositor::new())),
            Arc::new(EventBus::default()),
            CancellationToken::new(),
        );
        Fixture {
            engine,
            store,
            client,
            latch,
        }
    }

    fn test_config() -> MakerConfig {
        MakerConfig {
            base_size: dec!(0.07),
            inventory_soft_cap: dec!(0.5),
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingClient::new(), test_config())
    }

    #[tokio::test]
    async fn test_cycle_posts_two_sided_quote() {
        let mut fx = fixture();
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);

        fx.engine.run_cycle(0).await;

        let submissions = fx.client.submissions.lock().clone();
        assert_eq!(submissions.len(), 2);
        let (bid_side, bid_price, bid_size) = submissions[0];
        let (ask_side, ask_price, ask_size) = submissions[1];
        assert_eq!(bid_side, Side::Bid);
        assert_eq!(ask_side, Side::Ask);
        assert!(bid_price < Price::new(dec!(143.02)));
        assert!(ask_price > Price::new(dec!(143.02)));
        assert!(spec().satisfies_minima(bid_price, bid_size));
        assert!(spec().satisfies_minima(ask_price, ask_size));

        // Orders tracked, heartbeat touched.
        assert_eq!(fx.store.get_orders(&mk(), None, None).len(), 2);
        assert!(fx.store.heartbeat_age(QUOTE_HEARTBEAT).is_some());
    }

    #[tokio::test]
    async fn test_sticky_quote_skips_resubmission() {
        let mut fx = fixture();
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);

        fx.engine.run_cycle(0).await;
        assert_eq!(fx.client.submissions.lock().len(), 2);

        // Same mid: both sides are within epsilon, nothing is replaced.
        fx.engine.run_cycle(0).await;
        assert_eq!(fx.client.submissions.lock().len(), 2);
        assert!(fx.client.cancels.lock().is_empty());
    }

    #[tokio::test]
    async fn test_mid_move_replaces_quotes() {
        let mut fx = fixture();
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);
        fx.engine.run_cycle(0).await;

        fx.store.set_mid(&mk(), Price::new(dec!(144.50)), 2);
        fx.engine.run_cycle(0).await;

        assert_eq!(fx.client.cancels.lock().len(), 2);
        assert_eq!(fx.client.submissions.lock().len(), 4);
        assert_eq!(fx.store.get_orders(&mk(), None, None).len(), 2);
    }

    #[tokio::test]
    async fn test_synthetic_mid_produces_no_orders() {
        let mut fx = fixture();
        fx.store.set_synthetic_mid(&mk(), Price::new(dec!(143.02)), 1);

        fx.engine.run_cycle(0).await;

        assert!(fx.client.submissions.lock().is_empty());
        // The cycle still completes and touches the heartbeat.
        assert!(fx.store.heartbeat_age(QUOTE_HEARTBEAT).is_some());
    }

    #[tokio::test]
    async fn test_latch_blocks_maker_until_reset() {
        let mut fx = fixture();
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);
        fx.latch.trigger(LatchReason::Manual {
            message: "operator".to_string(),
        });

        fx.engine.run_cycle(0).await;
        assert!(fx.client.submissions.lock().is_empty());

        fx.latch.reset();
        fx.engine.run_cycle(0).await;
        assert_eq!(fx.client.submissions.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_rejection_not_retried() {
        let reject = || {
            Err(SubmitError::new(
                SubmitErrorKind::MinNotional,
                "below min notional",
            ))
        };
        let mut fx = fixture_with(
            RecordingClient::scripted(vec![reject(), reject()]),
            test_config(),
        );
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);

        fx.engine.run_cycle(0).await;

        // One attempt per side, no retries, nothing tracked.
        assert_eq!(fx.client.submissions.lock().len(), 2);
        assert!(fx.store.get_orders(&mk(), None, None).is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let mut fx = fixture_with(
            RecordingClient::scripted(vec![Err(SubmitError::new(
                SubmitErrorKind::Network,
                "timeout",
            ))]),
            test_config(),
        );
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);

        fx.engine.run_cycle(0).await;

        // Bid: failure + retry; ask: single attempt.
        assert_eq!(fx.client.submissions.lock().len(), 3);
        assert_eq!(fx.store.get_orders(&mk(), None, None).len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_crossed_rejection_latches() {
        let mut fx = fixture_with(
            RecordingClient::scripted(vec![Err(SubmitError::new(
                SubmitErrorKind::Crossed,
                "would cross",
            ))]),
            test_config(),
        );
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);

        fx.engine.run_cycle(0).await;
        assert!(fx.latch.is_latched());
    }

    #[tokio::test]
    async fn test_maker_suspension_skips_cycle() {
        let mut fx = fixture();
        fx.store.set_mid(&mk(), Price::new(dec!(143.02)), 1);
        fx.store.suspend_maker(Duration::from_secs(60));

        fx.engine.run_cycle(0).await;
        assert!(fx.client.submissions.lock().is_empty());
    }
}
