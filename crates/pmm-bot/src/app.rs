//! Application wiring and lifecycle.
//!
//! Single-process, cooperatively scheduled: every component runs as a
//! task on one current-thread runtime and shares the same state store.
//! Shutdown order: stop the ingestors, let the maker cancel its
//! orders, drain pending ledger appends, exit. Hedger orders in flight
//! are not canceled; flattening is allowed to complete.

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::paper::PaperTradingClient;
use parking_lot::Mutex;
use pmm_core::{EventBus, MarketId, MarketSpec, TradingClient};
use pmm_feed::{AccountIngestor, AccountIngestorConfig, Ingestor, IngestorConfig};
use pmm_guard::{Guard, KillSwitchLatch};
use pmm_hedger::Hedger;
use pmm_ledger::{FillLedger, PnlCompositor};
use pmm_maker::MakerEngine;
use pmm_state::{CostBasis, StateStore};
use pmm_ws::{WsAccountConnector, WsMarketConnector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The assembled bot.
pub struct Application {
    config: AppConfig,
    store: Arc<StateStore>,
    ledger: Arc<Mutex<FillLedger>>,
    compositor: Arc<Mutex<PnlCompositor>>,
    events: Arc<EventBus>,
    latch: Arc<KillSwitchLatch>,
    guard: Arc<Guard>,
    client: Arc<dyn TradingClient>,
    fill_wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build every component from configuration. Replays the fill
    /// ledger into a fresh compositor so realized PnL, cost basis and
    /// inventory survive restarts.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let store = Arc::new(StateStore::new());
        let events = Arc::new(EventBus::default());
        let latch = Arc::new(KillSwitchLatch::new());

        let ledger = FillLedger::open(
            &config.ledger.path,
            &config.ledger.archive_dir,
            config.ledger.max_bytes,
        )?;
        let fills = ledger.read_all()?;
        let compositor = PnlCompositor::replay(&fills);

        // Restore per-market inventory and cost basis from the replay;
        // the account stream reconciles against the exchange later.
        for entry in &config.markets {
            let market = entry.market_id();
            let restored = compositor.lot_sum(&market);
            if !restored.is_zero() {
                store.update_inventory(&market, restored);
            }
            let (avg_price, signed_size) = compositor.cost_basis(&market);
            store.set_cost_basis(
                &market,
                CostBasis {
                    avg_price,
                    signed_size,
                },
            );
        }
        info!(fills = fills.len(), "ledger replayed into compositor");

        let specs: HashMap<MarketId, MarketSpec> = config
            .markets
            .iter()
            .map(|m| (m.market_id(), m.spec()))
            .collect();
        let guard = Arc::new(Guard::new(
            config.guard.clone(),
            store.clone(),
            specs,
            latch.clone(),
            events.clone(),
        ));

        let client: Arc<dyn TradingClient> = Arc::new(PaperTradingClient::new());

        Ok(Self {
            config,
            store,
            ledger: Arc::new(Mutex::new(ledger)),
            compositor: Arc::new(Mutex::new(compositor)),
            events,
            latch,
            guard,
            client,
            fill_wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn latch(&self) -> &Arc<KillSwitchLatch> {
        &self.latch
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until a shutdown signal, then wind down in order.
    pub async fn run(self) -> AppResult<()> {
        let markets: Vec<(MarketId, MarketSpec)> = self
            .config
            .markets
            .iter()
            .map(|m| (m.market_id(), m.spec()))
            .collect();

        let mut tasks = Vec::new();

        // Market-data ingestor.
        let ingestor_config = IngestorConfig {
            markets: markets.iter().map(|(m, _)| m.clone()).collect(),
            keepalive_interval: Duration::from_millis(self.config.feed.keepalive_ms),
            synthetic_threshold: Duration::from_millis(self.config.feed.synthetic_threshold_ms),
            synthetic_interval: Duration::from_millis(self.config.feed.synthetic_interval_ms),
            ..Default::default()
        };
        let ingestor = Ingestor::new(
            ingestor_config,
            Arc::new(WsMarketConnector::new(self.config.feed.market_url.clone())),
            self.store.clone(),
            self.events.clone(),
            self.shutdown.clone(),
        );
        tasks.push(tokio::spawn(ingestor.run()));

        // Account ingestor.
        let account_config = AccountIngestorConfig {
            lot_sizes: markets
                .iter()
                .map(|(m, s)| (m.clone(), s.lot_size()))
                .collect(),
            reconcile_cooldown: Duration::from_millis(self.config.feed.reconcile_cooldown_ms),
            keepalive_interval: Duration::from_millis(self.config.feed.keepalive_ms),
            buffer_deadline: Duration::from_millis(self.config.feed.buffer_deadline_ms),
            ..Default::default()
        };
        let account = AccountIngestor::new(
            account_config,
            Arc::new(WsAccountConnector::new(
                self.config.feed.account_url.clone(),
            )),
            self.store.clone(),
            self.ledger.clone(),
            self.compositor.clone(),
            self.events.clone(),
            self.fill_wake.clone(),
            self.shutdown.clone(),
        );
        tasks.push(tokio::spawn(account.run()));

        // Maker engine.
        if self.config.maker.enabled {
            let maker = MakerEngine::new(
                self.config.maker.clone(),
                markets.clone(),
                self.store.clone(),
                self.guard.clone(),
                self.client.clone(),
                self.compositor.clone(),
                self.events.clone(),
                self.shutdown.clone(),
            );
            tasks.push(tokio::spawn(maker.run()));
        }

        // One hedger per market.
        if self.config.hedger.enabled {
            for (market, spec) in &markets {
                let hedger = Hedger::new(
                    self.config.hedger.clone(),
                    market.clone(),
                    spec.clone(),
                    self.store.clone(),
                    self.guard.clone(),
                    self.client.clone(),
                    self.events.clone(),
                    self.fill_wake.clone(),
                    self.shutdown.clone(),
                );
                tasks.push(tokio::spawn(hedger.run()));
            }
        }

        info!(tasks = tasks.len(), "bot running");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "signal listener failed");
                }
                info!("shutdown signal received");
            }
            () = self.shutdown.cancelled() => {
                info!("shutdown requested");
            }
        }

        // 1-2. Stop frame intake; the maker cancels its orders as its
        // task exits. Hedger legs in flight run to completion.
        self.shutdown.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "task join failed");
            }
        }

        // 3. Drain pending ledger appends within a bounded deadline.
        self.drain_ledger().await;

        info!("bot stopped");
        Ok(())
    }

    async fn drain_ledger(&self) {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.feed.buffer_deadline_ms);
        loop {
            let pending = self.ledger.lock().pending_count();
            if pending == 0 {
                return;
            }
            if Instant::now() >= deadline {
                warn!(pending, "ledger drain deadline passed; records remain buffered");
                return;
            }
            self.ledger.lock().retry_pending();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, MarketEntry};
    use pmm_core::{Fill, OrderRole, Price, Side, Size};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        AppConfig {
            markets: vec![MarketEntry {
                key: "market:2".to_string(),
                price_scale: 100,
                size_scale: 10_000,
                exchange_min_size: dec!(0.001),
                exchange_min_notional: dec!(5),
            }],
            ledger: LedgerConfig {
                path: dir
                    .path()
                    .join("fills.jsonl")
                    .to_string_lossy()
                    .into_owned(),
                archive_dir: dir.path().join("archive").to_string_lossy().into_owned(),
                max_bytes: 1 << 20,
            },
            ..Default::default()
        }
    }

    fn fill(ts_ms: i64, side: Side, size: &str, price: &str) -> Fill {
        Fill {
            ts_ms,
            market: MarketId::from("market:2"),
            side,
            role: OrderRole::Maker,
            size: Size::new(size.parse().unwrap()),
            price: Price::new(price.parse().unwrap()),
            fee: dec!(0),
            quote_delta: dec!(0),
            inventory_after: Size::ZERO,
        }
    }

    #[test]
    fn test_restart_restores_inventory_and_cost_basis() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        {
            let mut ledger = FillLedger::open(
                &config.ledger.path,
                &config.ledger.archive_dir,
                config.ledger.max_bytes,
            )
            .unwrap();
            ledger.append(fill(1000, Side::Bid, "0.02", "100.00"));
            ledger.append(fill(2000, Side::Ask, "0.01", "105.00"));
        }

        let app = Application::new(config).unwrap();
        let market = MarketId::from("market:2");
        assert_eq!(app.store().get_inventory(&market).inner(), dec!(0.01));
        let basis = app.store().get_cost_basis(&market);
        assert_eq!(basis.avg_price.inner(), dec!(100.00));
        assert_eq!(basis.signed_size.inner(), dec!(0.01));
    }

    #[test]
    fn test_replay_matches_live_realized_pnl() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let market = MarketId::from("market:2");

        // Live run.
        let mut live = PnlCompositor::new();
        {
            let mut ledger = FillLedger::open(
                &config.ledger.path,
                &config.ledger.archive_dir,
                config.ledger.max_bytes,
            )
            .unwrap();
            for f in [
                fill(1, Side::Bid, "1", "100"),
                fill(2, Side::Bid, "1", "110"),
                fill(3, Side::Ask, "1", "120"),
                fill(4, Side::Ask, "1", "105"),
            ] {
                live.on_fill(&f);
                ledger.append(f);
            }
        }
        let live_pnl = live.realized(&market);
        assert_eq!(live_pnl, dec!(15));

        // Restart: rebuilt compositor reports the identical number.
        let app = Application::new(config).unwrap();
        assert_eq!(app.compositor.lock().realized(&market), live_pnl);
    }
}
