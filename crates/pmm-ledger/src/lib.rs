//! Fill persistence and PnL reconstruction.
//!
//! - `FillLedger`: durable append-only JSON Lines record of every fill,
//!   with size-based rotation into an archive tier. Each line stands
//!   alone, so truncation at any line boundary is safe.
//! - `PnlCompositor`: per-market FIFO lot queues deriving realized PnL
//!   (total and windowed), unrealized PnL at mid, and cost basis.
//!   Replaying the ledger into a fresh compositor reproduces the live
//!   run exactly.

mod compositor;
mod error;
mod ledger;

pub use compositor::{Lot, PnlCompositor};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{AppendOutcome, FillLedger};
