//! Reconcile loop scheduling.

use std::time::Duration;

/// Exponential backoff over a fixed base interval.
///
/// Starts at `base`, doubles per consecutive failure up to `max`, and snaps
/// back to `base` on the first success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Delay before the next cycle.
    pub fn current(&self) -> Duration {
        if self.failures == 0 {
            return self.base;
        }
        let factor = 1u32 << self.failures.min(31);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Record a failed cycle and return the next delay.
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    /// Record a successful cycle and return the base interval.
    pub fn succeed(&mut self) -> Duration {
        self.failures = 0;
        self.base
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_then_caps() {
        let mut b = Backoff::new(Duration::from_secs(60), Duration::from_secs(300));
        assert_eq!(b.current(), Duration::from_secs(60));
        assert_eq!(b.fail(), Duration::from_secs(120));
        assert_eq!(b.fail(), Duration::from_secs(240));
        assert_eq!(b.fail(), Duration::from_secs(300));
        for _ in 0..40 {
            b.fail();
        }
        assert_eq!(b.current(), Duration::from_secs(300));
    }

    #[test]
    fn test_success_resets() {
        let mut b = Backoff::new(Duration::from_secs(60), Duration::from_secs(300));
        b.fail();
        b.fail();
        assert_eq!(b.succeed(), Duration::from_secs(60));
        assert_eq!(b.failures(), 0);
        assert_eq!(b.fail(), Duration::from_secs(120));
    }
}
