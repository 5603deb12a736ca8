//! Exponential backoff with jitter for repeated accept failures.

use std::time::Duration;

use rand::Rng;

const BASE_DELAY_MS: u64 = 5;
const MAX_DELAY_MS: u64 = 1000;

/// Tracks consecutive accept errors (e.g. EMFILE) and spaces out retries.
#[derive(Debug, Default)]
pub struct AcceptBackoff {
    consecutive_failures: u32,
}

impl AcceptBackoff {
    /// Record a failure and return how long to pause before the next accept.
    pub fn on_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay_for(self.consecutive_failures, BASE_DELAY_MS, MAX_DELAY_MS)
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Doubling delay from `base_ms`, capped at `max_ms`, plus up to 10% jitter.
fn delay_for(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let capped = base_ms
        .saturating_mul(2u64.saturating_pow(attempt - 1))
        .min(max_ms);
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        assert_eq!(delay_for(0, 100, 2000), Duration::ZERO);
        assert!(delay_for(1, 100, 2000) >= Duration::from_millis(100));
        assert!(delay_for(2, 100, 2000) >= Duration::from_millis(200));

        let capped = delay_for(40, 100, 1000);
        assert!(capped >= Duration::from_millis(1000));
        assert!(capped < Duration::from_millis(1100));
    }

    #[test]
    fn success_resets() {
        let mut backoff = AcceptBackoff::default();
        backoff.on_failure();
        backoff.on_failure();
        assert_eq!(backoff.consecutive_failures(), 2);
        backoff.on_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert!(backoff.on_failure() <= Duration::from_millis(BASE_DELAY_MS + 1));
    }
}
