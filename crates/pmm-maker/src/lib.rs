//! Adaptive two-sided quoting.
//!
//! The engine refreshes a bid/ask pair per market at a configured
//! cadence. Quoting decomposes into a core (spread around mid,
//! quantization, sticky quotes, cancel discipline) and pluggable
//! feature modules that each contribute a spread delta, a size
//! multiplier and side gates. Features are composed: deltas sum,
//! multipliers multiply, gates union.

pub mod config;
pub mod engine;
pub mod features;
pub mod quote;
pub mod throttle;

pub use config::MakerConfig;
pub use engine::MakerEngine;
pub use features::{Adjustment, Feature, FeatureSignals, QuoteContext, SideGates, StateChange};
pub use quote::QuotePlan;
pub use throttle::CancelThrottle;
