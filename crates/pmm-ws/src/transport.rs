//! tokio-tungstenite transport implementing the stream traits.
//!
//! Text frames carry the typed JSON messages; transport-level ping
//! frames are answered by tungstenite itself, application-level pings
//! surface as frames so the ingestor can account for keepalives.

use crate::error::{WsError, WsResult};
use crate::message::{AccountFrame, MarketFrame, SubscriptionRequest};
use crate::stream::{AccountConnector, AccountStream, MarketConnector, MarketStream};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct WsSession {
    sink: WsSink,
    source: WsSource,
}

impl WsSession {
    async fn open(url: &str) -> WsResult<Self> {
        info!(url, "connecting stream");
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (sink, source) = socket.split();
        Ok(Self { sink, source })
    }

    async fn send_json<T: Serialize>(&mut self, value: &T) -> WsResult<()> {
        let payload = serde_json::to_string(value).map_err(|e| WsError::Send(e.to_string()))?;
        self.sink
            .send(Message::Text(payload))
            .await
            .map_err(|e| WsError::Send(e.to_string()))
    }

    /// Next typed frame; skips non-text messages, surfaces close.
    async fn next_json<T: DeserializeOwned>(&mut self) -> WsResult<T> {
        loop {
            let message = self
                .source
                .next()
                .await
                .ok_or(WsError::Closed)?
                .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
            match message {
                Message::Text(text) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| WsError::Parse(format!("{e}: {text}")));
                }
                Message::Close(_) => return Err(WsError::Closed),
                other => debug!(?other, "ignoring non-text frame"),
            }
        }
    }
}

struct WsMarketStream {
    session: WsSession,
}

#[async_trait]
impl MarketStream for WsMarketStream {
    async fn next_frame(&mut self) -> WsResult<MarketFrame> {
        self.session.next_json().await
    }

    async fn send_pong(&mut self) -> WsResult<()> {
        self.session.send_json(&MarketFrame::Pong).await
    }

    async fn resubscribe(&mut self, request: &SubscriptionRequest) -> WsResult<()> {
        self.session.send_json(request).await
    }
}

/// Market-data connector over a WebSocket endpoint.
pub struct WsMarketConnector {
    url: String,
}

impl WsMarketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl MarketConnector for WsMarketConnector {
    async fn connect(&self, request: &SubscriptionRequest) -> WsResult<Box<dyn MarketStream>> {
        let mut session = WsSession::open(&self.url).await?;
        session.send_json(request).await?;
        Ok(Box::new(WsMarketStream { session }))
    }
}

struct WsAccountStream {
    session: WsSession,
}

#[async_trait]
impl AccountStream for WsAccountStream {
    async fn next_frame(&mut self) -> WsResult<AccountFrame> {
        self.session.next_json().await
    }

    async fn send_pong(&mut self) -> WsResult<()> {
        self.session.send_json(&AccountFrame::Pong).await
    }
}

/// Account-stream connector over a WebSocket endpoint.
pub struct WsAccountConnector {
    url: String,
}

impl WsAccountConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl AccountConnector for WsAccountConnector {
    async fn connect(&self) -> WsResult<Box<dyn AccountStream>> {
        let session = WsSession::open(&self.url).await?;
        Ok(Box::new(WsAccountStream { session }))
    }
}
