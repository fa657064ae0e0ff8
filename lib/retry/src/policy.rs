use std::sync::Arc;
use std::time::Duration;

use backoff::{Backoff, ExponentialBackoff, Jitter};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: u64 = 10; // milliseconds
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Bounds how often, and how fast, a conflicting operation is re-run.
///
/// The default allows 5 attempts with an exponential backoff that starts at
/// 10ms, doubles after every conflict and never exceeds 1s. Jitter is off by
/// default, so the delays are non-decreasing.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
    jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Arc::new(
                ExponentialBackoff::from_millis(DEFAULT_INITIAL_BACKOFF)
                    .max_delay(DEFAULT_MAX_BACKOFF),
            ),
            jitter: Jitter::NONE,
        }
    }
}

impl RetryPolicy {
    /// A policy with the default backoff that tries at most `max_attempts` times.
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total tries, including the first one.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }

        Ok(())
    }

    /// The wait after `attempt` failed with a conflict, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }
}
