//! Authoritative in-process state store.
//!
//! Single source of truth for mids, inventory, open orders, cost basis
//! and liveness heartbeats. Every component holds the same
//! `Arc<StateStore>`; all mutation goes through its methods so the
//! mutation boundary stays explicit.

mod store;

pub use store::{
    CostBasis, MidEntry, ReconcileOutcome, StateStore, VolumeStats, LEDGER_DEGRADED_FLAG,
    PNL_GUARD_FLAG,
};
