//! Delay curves used between retry attempts.
//!
//! `ExponentialBackoff` started life as the strategy from the `tokio-retry` crate
//! (MIT License, Copyright (c) 2017 Sam Rijs), it is addressed by attempt number
//! here instead of being driven as an iterator.

use std::fmt::Debug;
use std::time::Duration;

/// A function of the attempt number to the delay inserted after that attempt
/// failed.
///
/// `attempt` is 1-based, `delay(1)` is the wait between the first and the
/// second attempt.
pub trait Backoff: Debug + Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// A retry strategy driven by exponential back-off.
///
/// The power corresponds to the number of past attempts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: u64,
    factor: u64,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    /// Constructs a new exponential back-off strategy, given the first delay
    /// in milliseconds.
    ///
    /// The default factor is `2`, so every delay doubles the previous one.
    pub const fn from_millis(initial: u64) -> ExponentialBackoff {
        ExponentialBackoff {
            initial,
            factor: 2,
            max_delay: None,
        }
    }

    pub const fn from_secs(initial: u64) -> ExponentialBackoff {
        Self::from_millis(initial.saturating_mul(1000))
    }

    /// A multiplicative factor applied to the delay after every attempt.
    ///
    /// A factor of `1` turns this into a constant delay, `0` is treated as `1`
    /// so the curve never decreases.
    pub const fn factor(mut self, factor: u64) -> ExponentialBackoff {
        self.factor = if factor == 0 { 1 } else { factor };
        self
    }

    /// Apply a maximum delay. No retry delay will be longer than this `Duration`.
    pub const fn max_delay(mut self, duration: Duration) -> ExponentialBackoff {
        self.max_delay = Some(duration);
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let power = attempt.saturating_sub(1);
        let millis = self
            .factor
            .checked_pow(power)
            .and_then(|scale| self.initial.checked_mul(scale))
            .unwrap_or(u64::MAX);
        let duration = Duration::from_millis(millis);

        match self.max_delay {
            Some(max_delay) if duration > max_delay => max_delay,
            _ => duration,
        }
    }
}

/// The same delay after every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Constant(pub Duration);

impl Backoff for Constant {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Retry immediately.
pub const ZERO: Constant = Constant(Duration::ZERO);

/// Randomized perturbation of a delay.
///
/// A delay `d` becomes `d + r * factor * d` where `r` is uniform in `[0, 1)`,
/// so jitter only ever lengthens a delay.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Jitter {
    factor: f64,
}

impl Jitter {
    pub const NONE: Jitter = Jitter { factor: 0.0 };

    pub fn new(factor: f64) -> Self {
        if factor.is_finite() && factor > 0.0 {
            Jitter { factor }
        } else {
            Jitter::NONE
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.factor > 0.0
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        if !self.is_enabled() || delay.is_zero() {
            return delay;
        }

        self.scale(delay, rand::random::<f64>())
    }

    fn scale(&self, delay: Duration, random: f64) -> Duration {
        let extra = delay.as_secs_f64() * self.factor * random;

        Duration::try_from_secs_f64(extra)
            .ok()
            .and_then(|extra| delay.checked_add(extra))
            .unwrap_or(Duration::MAX)
    }
}
