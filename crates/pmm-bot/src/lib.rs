//! Bot wiring.
//!
//! Builds the state store, ledger, compositor, guard, ingestors, maker
//! and hedger from configuration, runs them as tasks on one
//! current-thread runtime, and owns the shutdown sequence.

pub mod app;
pub mod config;
pub mod error;
pub mod paper;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use paper::PaperTradingClient;
