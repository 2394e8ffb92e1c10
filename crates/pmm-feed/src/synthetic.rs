//! Synthetic mid generation.
//!
//! When the real feed goes quiet the ingestor perturbs the last known
//! mid with a bounded random walk so downstream components keep
//! exercising their logic. Synthetic mids are marked as such; the guard
//! refuses to place orders against them.

use pmm_core::Price;
use rand::Rng;
use rust_decimal::Decimal;

/// Bounded random walk around an anchor price.
#[derive(Debug)]
pub struct SyntheticWalk {
    /// Last real mid; the walk never strays beyond the band around it.
    anchor: Price,
    current: Price,
    /// Per-tick step, in bps of the anchor.
    step_bps: Decimal,
    /// Maximum total deviation from the anchor, in bps.
    band_bps: Decimal,
}

impl SyntheticWalk {
    pub fn new(anchor: Price, step_bps: Decimal, band_bps: Decimal) -> Self {
        Self {
            anchor,
            current: anchor,
            step_bps,
            band_bps,
        }
    }

    /// Advance one tick and return the new synthetic mid.
    pub fn next_mid(&mut self) -> Price {
        let scale: i64 = rand::thread_rng().gen_range(-1000..=1000);
        let step = self.anchor.inner() * self.step_bps * Decimal::from(scale)
            / (Decimal::from(10_000) * Decimal::from(1000));
        let proposed = self.current.inner() + step;

        let band = self.anchor.inner() * self.band_bps / Decimal::from(10_000);
        let lower = self.anchor.inner() - band;
        let upper = self.anchor.inner() + band;
        self.current = Price::new(proposed.clamp(lower, upper));
        self.current
    }

    pub fn current(&self) -> Price {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_walk_stays_in_band() {
        let anchor = Price::new(dec!(143.00));
        let band_bps = dec!(100); // ±1%
        let mut walk = SyntheticWalk::new(anchor, dec!(5), band_bps);

        let lower = dec!(143.00) * (dec!(1) - dec!(0.01));
        let upper = dec!(143.00) * (dec!(1) + dec!(0.01));
        for _ in 0..10_000 {
            let mid = walk.next_mid().inner();
            assert!(mid >= lower && mid <= upper, "walk escaped band: {mid}");
        }
    }

    #[test]
    fn test_walk_moves() {
        let mut walk = SyntheticWalk::new(Price::new(dec!(100)), dec!(10), dec!(200));
        let start = walk.current();
        let moved = (0..100).any(|_| walk.next_mid() != start);
        assert!(moved, "walk never moved off the anchor");
    }
}
