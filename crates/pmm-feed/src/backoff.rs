//! Reconnection backoff: exponential with jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff (initial 1 s, factor 2, cap 30 s, jitter ±25%).
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter: f64,
}

impl ReconnectBackoff {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial.as_secs_f64() * exp;
        let capped = base.min(self.cap.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let backoff = ReconnectBackoff::default();

        for _ in 0..20 {
            let d1 = backoff.delay(1).as_secs_f64();
            assert!((0.75..=1.25).contains(&d1), "attempt 1 delay {d1}");

            let d3 = backoff.delay(3).as_secs_f64();
            assert!((3.0..=5.0).contains(&d3), "attempt 3 delay {d3}");

            // Far past the cap: 30 s ± 25%.
            let d10 = backoff.delay(10).as_secs_f64();
            assert!((22.5..=37.5).contains(&d10), "attempt 10 delay {d10}");
        }
    }
}
