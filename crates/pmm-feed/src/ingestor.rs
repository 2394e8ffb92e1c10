//! Market-data ingestor.
//!
//! Owns the full session lifecycle: subscribe, parse, keepalive
//! accounting, reconnect with jittered exponential backoff, and the
//! synthetic fallback that keeps mids flowing while the feed is down.

use crate::backoff::ReconnectBackoff;
use crate::synthetic::SyntheticWalk;
use pmm_core::{EventBus, EventKind, MarketId};
use pmm_state::StateStore;
use pmm_ws::{MarketConnector, MarketFrame, MarketStream, SubscriptionRequest, WsError};
use pmm_ws::KeepaliveTracker;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Heartbeat source name for the market-data feed.
pub const MARKET_DATA_HEARTBEAT: &str = "market_data";

/// Ingestor tuning.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub markets: Vec<MarketId>,
    /// Longest silence tolerated before counting a keepalive miss.
    pub keepalive_interval: Duration,
    /// Feed silence after which synthetic mids start.
    pub synthetic_threshold: Duration,
    /// Cadence of synthetic ticks.
    pub synthetic_interval: Duration,
    pub synthetic_step_bps: Decimal,
    pub synthetic_band_bps: Decimal,
    /// Consecutive parse errors on a session before resubscribing.
    pub parse_errors_before_resubscribe: u32,
    /// Sustained reconnect failure raises an alarm (but never exits).
    pub outage_alarm: Duration,
    pub backoff: ReconnectBackoff,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            markets: Vec::new(),
            keepalive_interval: Duration::from_secs(20),
            synthetic_threshold: Duration::from_secs(30),
            synthetic_interval: Duration::from_secs(1),
            synthetic_step_bps: rust_decimal_macros::dec!(5),
            synthetic_band_bps: rust_decimal_macros::dec!(100),
            parse_errors_before_resubscribe: 3,
            outage_alarm: Duration::from_secs(300),
            backoff: ReconnectBackoff::default(),
        }
    }
}

/// Market-data ingestor task.
pub struct Ingestor {
    config: IngestorConfig,
    connector: Arc<dyn MarketConnector>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
    walks: HashMap<MarketId, SyntheticWalk>,
}

impl Ingestor {
    pub fn new(
        config: IngestorConfig,
        connector: Arc<dyn MarketConnector>,
        store: Arc<StateStore>,
        events: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            events,
            shutdown,
            walks: HashMap::new(),
        }
    }

    /// Run until shutdown. Never exits on recoverable errors.
    pub async fn run(mut self) {
        let request = SubscriptionRequest::for_markets(self.config.markets.iter());
        let mut attempt = 0u32;
        let mut disconnected_at: Option<Instant> = None;
        let mut outage_alarmed = false;

        info!(markets = self.config.markets.len(), "ingestor starting");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.connector.connect(&request).await {
                Ok(stream) => {
                    attempt = 0;
                    disconnected_at = None;
                    outage_alarmed = false;
                    if let Err(e) = self.run_session(stream, &request).await {
                        warn!(error = %e, "market stream session ended");
                    }
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "market stream connect failed");
                }
            }

            attempt += 1;
            let delay = self.config.backoff.delay(attempt);
            self.events.emit(EventKind::IngestorReconnect {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });

            let down_since = *disconnected_at.get_or_insert_with(Instant::now);
            if !outage_alarmed && down_since.elapsed() >= self.config.outage_alarm {
                error!(
                    seconds = down_since.elapsed().as_secs(),
                    "market feed outage sustained"
                );
                outage_alarmed = true;
            }

            self.idle_with_synthetic(delay).await;
        }
        info!("ingestor stopped");
    }

    async fn run_session(
        &mut self,
        mut stream: Box<dyn MarketStream>,
        request: &SubscriptionRequest,
    ) -> Result<(), WsError> {
        let mut keepalive = KeepaliveTracker::default();
        let mut parse_errors = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let next = tokio::time::timeout(self.config.keepalive_interval, stream.next_frame());
            match next.await {
                Ok(Ok(frame)) => {
                    keepalive.record_activity();
                    match frame {
                        MarketFrame::MidUpdate { ref market, ts_ms, .. } => {
                            parse_errors = 0;
                            if let Some(mid) = frame.mid() {
                                self.store.set_mid(market, mid, ts_ms);
                                self.store.heartbeat(MARKET_DATA_HEARTBEAT);
                            }
                        }
                        MarketFrame::Ping => stream.send_pong().await?,
                        MarketFrame::Pong => {}
                        MarketFrame::SubscriptionAck { channel } => {
                            debug!(channel, "subscription acked");
                        }
                        MarketFrame::Error { message } => {
                            warn!(message, "stream error frame");
                        }
                    }
                }
                Ok(Err(WsError::Parse(message))) => {
                    parse_errors += 1;
                    warn!(parse_errors, message, "dropping unparseable frame");
                    if parse_errors >= self.config.parse_errors_before_resubscribe {
                        info!("parse error streak; resubscribing");
                        stream.resubscribe(request).await?;
                        parse_errors = 0;
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let missed = keepalive.record_miss();
                    warn!(missed, "keepalive deadline passed with no frame");
                    if keepalive.is_dead() {
                        return Err(WsError::KeepaliveTimeout);
                    }
                }
            }
        }
    }

    /// Sleep out a backoff delay, emitting synthetic mids if the feed
    /// has been quiet past the threshold.
    async fn idle_with_synthetic(&mut self, delay: Duration) {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.shutdown.is_cancelled() {
                return;
            }
            let tick = remaining.min(self.config.synthetic_interval);
            tokio::select! {
                () = tokio::time::sleep(tick) => {}
                () = self.shutdown.cancelled() => return,
            }
            self.emit_synthetic_if_stale();
        }
    }

    fn emit_synthetic_if_stale(&mut self) {
        let stale = self
            .store
            .heartbeat_age(MARKET_DATA_HEARTBEAT)
            .is_some_and(|age| age >= self.config.synthetic_threshold);
        if !stale {
            return;
        }

        let now_ms = unix_millis();
        for market in &self.config.markets {
            let Some(entry) = self.store.get_mid(market) else {
                continue;
            };
            let walk = if entry.synthetic {
                match self.walks.get_mut(market) {
                    Some(w) => w,
                    None => continue,
                }
            } else {
                // Anchor a fresh walk at the last real mid.
                self.walks.insert(
                    market.clone(),
                    SyntheticWalk::new(
                        entry.price,
                        self.config.synthetic_step_bps,
                        self.config.synthetic_band_bps,
                    ),
                );
                self.walks.get_mut(market).expect("walk just inserted")
            };
            let mid = walk.next_mid();
            self.store.set_synthetic_mid(market, mid, now_ms);
            debug!(market = %market, mid = %mid, "synthetic mid");
        }
    }
}

pub(crate) fn unix_millis() -> i64 {
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
    use pmm_core::Price;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct FakeStream {
        frames: mpsc::UnboundedReceiver<Result<MarketFrame, WsError>>,
        pongs: Arc<Mutex<u32>>,
        resubscribes: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl MarketStream for FakeStream {
        async fn next_frame(&mut self) -> Result<MarketFrame, WsError> {
            match self.frames.recv().await {
                Some(item) => item,
                None => Err(WsError::Closed),
            }
        }

        async fn send_pong(&mut self) -> Result<(), WsError> {
            *self.pongs.lock() += 1;
            Ok(())
        }

        async fn resubscribe(&mut self, _request: &SubscriptionRequest) -> Result<(), WsError> {
            *self.resubscribes.lock() += 1;
            Ok(())
        }
    }

    struct FakeConnector {
        sessions: Mutex<Vec<FakeStream>>,
    }

    #[async_trait]
    impl MarketConnector for FakeConnector {
        async fn connect(
            &self,
            _request: &SubscriptionRequest,
        ) -> Result<Box<dyn MarketStream>, WsError> {
            match self.sessions.lock().pop() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(WsError::ConnectionFailed("no more sessions".to_string())),
            }
        }
    }

    fn mk() -> MarketId {
        MarketId::from("market:2")
    }

    fn mid_frame(bid: &str, ask: &str) -> MarketFrame {
        MarketFrame::MidUpdate {
            market: mk(),
            best_bid: Price::new(bid.parse().unwrap()),
            best_ask: Price::new(ask.parse().unwrap()),
            ts_ms: 1,
        }
    }

    struct Fixture {
        store: Arc<StateStore>,
        shutdown: CancellationToken,
        pongs: Arc<Mutex<u32>>,
        resubscribes: Arc<Mutex<u32>>,
        tx: mpsc::UnboundedSender<Result<MarketFrame, WsError>>,
        ingestor: Option<Ingestor>,
    }

    fn fixture(config: IngestorConfig) -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        let pongs = Arc::new(Mutex::new(0));
        let resubscribes = Arc::new(Mutex::new(0));
        let connector = Arc::new(FakeConnector {
            sessions: Mutex::new(vec![FakeStream {
                frames: rx,
                pongs: pongs.clone(),
                resubscribes: resubscribes.clone(),
            }]),
        });
        let store = Arc::new(StateStore::new());
        let shutdown = CancellationToken::new();
        let ingestor = Ingestor::new(
            config,
            connector,
            store.clone(),
            Arc::new(EventBus::default()),
            shutdown.clone(),
        );
        Fixture {
            store,
            shutdown,
            pongs,
            resubscribes,
            tx,
            ingestor: Some(ingestor),
        }
    }

    fn test_config() -> IngestorConfig {
        IngestorConfig {
            markets: vec![mk()],
            keepalive_interval: Duration::from_millis(200),
            synthetic_threshold: Duration::from_millis(50),
            synthetic_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mid_update_reaches_store() {
        let mut fx = fixture(test_config());
        let handle = tokio::spawn(fx.ingestor.take().unwrap().run());

        fx.tx.send(Ok(mid_frame("143.00", "143.04"))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let entry = fx.store.get_mid(&mk()).unwrap();
        assert_eq!(entry.price.inner(), dec!(143.02));
        assert!(!entry.synthetic);
        assert!(fx.store.heartbeat_age(MARKET_DATA_HEARTBEAT).is_some());

        fx.shutdown.cancel();
        drop(fx.tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let mut fx = fixture(test_config());
        let handle = tokio::spawn(fx.ingestor.take().unwrap().run());

        fx.tx.send(Ok(MarketFrame::Ping)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*fx.pongs.lock(), 1);

        fx.shutdown.cancel();
        drop(fx.tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_parse_error_streak_resubscribes() {
        let mut fx = fixture(test_config());
        let handle = tokio::spawn(fx.ingestor.take().unwrap().run());

        for _ in 0..3 {
            fx.tx
                .send(Err(WsError::Parse("garbage".to_string())))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*fx.resubscribes.lock(), 1);

        // A good frame resets the streak: two more errors do not retrigger.
        fx.tx.send(Ok(mid_frame("100.00", "100.02"))).unwrap();
        fx.tx
            .send(Err(WsError::Parse("garbage".to_string())))
            .unwrap();
        fx.tx
            .send(Err(WsError::Parse("garbage".to_string())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*fx.resubscribes.lock(), 1);

        fx.shutdown.cancel();
        drop(fx.tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_synthetic_fallback_after_silence() {
        let mut config = test_config();
        config.keepalive_interval = Duration::from_millis(20);
        let mut fx = fixture(config);
        let handle = tokio::spawn(fx.ingestor.take().unwrap().run());

        // Seed one real mid, then go silent. The session dies on missed
        // keepalives, reconnect fails, and synthetic ticks begin.
        fx.tx.send(Ok(mid_frame("143.00", "143.04"))).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let entry = fx.store.get_mid(&mk()).unwrap();
        assert!(entry.synthetic, "expected synthetic mid after silence");
        // Bounded walk: within ±1% of the last real mid.
        let mid = entry.price.inner();
        assert!(mid >= dec!(141.5) && mid <= dec!(144.5), "mid {mid}");

        fx.shutdown.cancel();
        drop(fx.tx);
        handle.await.unwrap();
    }
}
