//! Stream ingestion.
//!
//! The market-data ingestor keeps a live mid for every configured
//! market: subscribe, parse, reconnect with jittered exponential
//! backoff, resubscribe after repeated parse errors, and synthesize
//! mids when the feed goes quiet so downstream logic stays warm. The
//! account ingestor reconciles position snapshots and turns fill events
//! into ledger records.

pub mod account;
pub mod backoff;
pub mod ingestor;
pub mod synthetic;

pub use account::{AccountIngestor, AccountIngestorConfig};
pub use backoff::ReconnectBackoff;
pub use ingestor::{Ingestor, IngestorConfig};
pub use synthetic::SyntheticWalk;
