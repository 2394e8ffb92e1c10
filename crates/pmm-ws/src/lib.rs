//! Stream plumbing for pmm.
//!
//! Defines the typed frames both exchange streams deliver, the
//! `MarketStream`/`AccountStream` traits the ingestors consume, a
//! keepalive tracker, and a tokio-tungstenite transport implementing
//! the traits against a real endpoint. Reconnection policy lives in the
//! ingestor, not here.

pub mod error;
pub mod heartbeat;
pub mod message;
pub mod stream;
pub mod transport;

pub use error::{WsError, WsResult};
pub use heartbeat::KeepaliveTracker;
pub use message::{AccountFrame, FillFrame, MarketFrame, PositionFrame, SubscriptionRequest};
pub use stream::{AccountConnector, AccountStream, MarketConnector, MarketStream};
pub use transport::{WsAccountConnector, WsMarketConnector};
