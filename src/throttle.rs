//! Adaptive throttle for origins that answer bursts of requests with 403
//!
//! One [`RateLimiter`] is shared by every segment worker of a download. Workers
//! report each success and each 403; the limiter turns a burst of 403s into a
//! small extra delay that workers honor cooperatively before fetching.
//!
//! # Algorithm
//!
//! - A 403 increments the consecutive counter. When it reaches the threshold the
//!   extra delay grows by one step (capped) and the counter resets to zero.
//! - A success while the counter is nonzero subtracts `success_decrement` from
//!   the counter and one decay step from the delay (both clamped at zero).
//! - A success while the counter is zero changes nothing.
//!
//! The delay therefore only grows after a burst and only shrinks after a
//! success, never both on the same observation.

use crate::config::ThrottleConfig;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct LimiterState {
    consecutive_403: u32,
    extra_delay: Duration,
}

/// Shared 403 throttle (cloneable, all clones share state)
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    config: Arc<ThrottleConfig>,
}

/// Point-in-time view of the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSnapshot {
    /// Consecutive 403s since the last burst or reset
    pub consecutive_403: u32,
    /// Current extra delay
    pub extra_delay: Duration,
}

impl RateLimiter {
    /// Create a limiter with zeroed state
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState::default())),
            config: Arc::new(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // The state is two plain numbers; a panic mid-update cannot leave it invalid
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a successful fetch
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.consecutive_403 == 0 {
            return;
        }
        state.consecutive_403 = state
            .consecutive_403
            .saturating_sub(self.config.success_decrement);
        state.extra_delay = state.extra_delay.saturating_sub(self.config.decay_step);
    }

    /// Record an HTTP 403
    pub fn record_rate_limited(&self) {
        let mut state = self.lock();
        state.consecutive_403 += 1;
        if state.consecutive_403 >= self.config.threshold {
            let raised = (state.extra_delay + self.config.step).min(self.config.max_delay);
            tracing::warn!(
                consecutive_403 = state.consecutive_403,
                delay_ms = raised.as_millis() as u64,
                "Origin is rate limiting, raising segment delay"
            );
            state.extra_delay = raised;
            state.consecutive_403 = 0;
        }
    }

    /// Current extra delay
    pub fn current_delay(&self) -> Duration {
        self.lock().extra_delay
    }

    /// How long a worker should pause before fetching, if at all
    pub fn backpressure(&self) -> Option<Duration> {
        let delay = self.current_delay();
        (delay > self.config.backpressure_threshold)
            .then(|| delay.mul_f64(self.config.backpressure_fraction))
    }

    /// Clear the delay and counter (start of batch retries)
    pub fn reset(&self) {
        let mut state = self.lock();
        state.consecutive_403 = 0;
        state.extra_delay = Duration::ZERO;
    }

    /// Current state
    pub fn snapshot(&self) -> ThrottleSnapshot {
        let state = self.lock();
        ThrottleSnapshot {
            consecutive_403: state.consecutive_403,
            extra_delay: state.extra_delay,
        }
    }
}
