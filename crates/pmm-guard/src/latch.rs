//! Kill-switch latch.
//!
//! Once triggered the latch stays set until an operator resets it.
//! Auto-reset is prohibited: while latched, no maker quote may be
//! posted; the hedger may still flatten in emergency mode.

use parking_lot::RwLock;
use pmm_core::MarketId;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::{error, info, warn};

/// Why the latch engaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatchReason {
    CrossedBook { market: MarketId },
    InventoryBreach { market: MarketId },
    Manual { message: String },
}

impl fmt::Display for LatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrossedBook { market } => write!(f, "crossed book on {market}"),
            Self::InventoryBreach { market } => write!(f, "inventory breach on {market}"),
            Self::Manual { message } => write!(f, "manual: {message}"),
        }
    }
}

/// Process-wide kill-switch latch.
///
/// Thread-safe: shared as `Arc<KillSwitchLatch>`.
pub struct KillSwitchLatch {
    latched: AtomicBool,
    latched_at_ms: AtomicI64,
    reason: RwLock<Option<LatchReason>>,
}

impl KillSwitchLatch {
    pub fn new() -> Self {
        Self {
            latched: AtomicBool::new(false),
            latched_at_ms: AtomicI64::new(0),
            reason: RwLock::new(None),
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::SeqCst)
    }

    /// Engage the latch. A second trigger keeps the original reason.
    pub fn trigger(&self, reason: LatchReason) {
        if self
            .latched
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.latched_at_ms
                .store(chrono_now_ms(), Ordering::SeqCst);
            *self.reason.write() = Some(reason.clone());
            error!(reason = %reason, "KILL SWITCH LATCHED");
        } else {
            warn!(new_reason = %reason, "kill switch already latched; keeping original reason");
        }
    }

    pub fn latched_at_ms(&self) -> Option<i64> {
        if self.is_latched() {
            let ts = self.latched_at_ms.load(Ordering::SeqCst);
            if ts > 0 {
                return Some(ts);
            }
        }
        None
    }

    pub fn reason(&self) -> Option<LatchReason> {
        if self.is_latched() {
            self.reason.read().clone()
        } else {
            None
        }
    }

    /// Operator reset. Only performed after investigating the trigger.
    pub fn reset(&self) {
        if self.is_latched() {
            let reason = self.reason.read().clone();
            info!(previous_reason = ?reason, "kill switch reset");
            self.latched.store(false, Ordering::SeqCst);
            self.latched_at_ms.store(0, Ordering::SeqCst);
            *self.reason.write() = None;
        }
    }
}

impl Default for KillSwitchLatch {
    fn default() -> Self {
        Self::new()
    }
}

fn chrono_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk() -> MarketId {
        MarketId::from("market:2")
    }

    #[test]
    fn test_initially_clear() {
        let latch = KillSwitchLatch::new();
        assert!(!latch.is_latched());
        assert!(latch.reason().is_none());
        assert!(latch.latched_at_ms().is_none());
    }

    #[test]
    fn test_trigger_and_reset() {
        let latch = KillSwitchLatch::new();
        latch.trigger(LatchReason::CrossedBook { market: mk() });

        assert!(latch.is_latched());
        assert!(latch.latched_at_ms().is_some());
        assert_eq!(
            latch.reason(),
            Some(LatchReason::CrossedBook { market: mk() })
        );

        latch.reset();
        assert!(!latch.is_latched());
        assert!(latch.reason().is_none());
    }

    #[test]
    fn test_second_trigger_keeps_original_reason() {
        let latch = KillSwitchLatch::new();
        latch.trigger(LatchReason::CrossedBook { market: mk() });
        latch.trigger(LatchReason::Manual {
            message: "second".to_string(),
        });

        assert_eq!(
            latch.reason(),
            Some(LatchReason::CrossedBook { market: mk() })
        );
    }
}
