//! Pre-trade validation and the process-wide kill switch.
//!
//! Every order the maker or hedger produces passes through the guard
//! before submission. Validation is synchronous and side-effect-free
//! except for rejection counters, events, and the kill-switch latch.
//! The guard never originates orders; it only filters.

mod guard;
mod latch;

pub use guard::{Guard, GuardConfig, OrderRequest, RejectReason};
pub use latch::{KillSwitchLatch, LatchReason};
