//! Inventory hedging.
//!
//! Watches the store's per-market inventory and drives it back toward
//! the target whenever it crosses the trigger, at minimum taker cost:
//! a passive resting attempt first, escalating to an aggressive cross
//! on timeout, with a guard-aware emergency path.

pub mod clip;
pub mod config;
pub mod hedger;

pub use clip::{size_clip, ClipDecision, ClipInputs};
pub use config::HedgerConfig;
pub use hedger::{Hedger, HedgerState};
