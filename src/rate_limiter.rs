//! # Adaptive Rate Limiter
//!
//! Enforces a minimum spacing between outbound backend calls. The spacing
//! escalates multiplicatively when pressure-classified failures come back
//! (quota, throttling, timeouts, connectivity) and decays back toward its
//! base through successful operations. This knob guards against bursts; the
//! queue's adaptive inter-operation delay independently paces the loop.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::classification::ErrorKind;
use crate::config::RateLimiterConfig;

#[derive(Debug)]
struct LimiterState {
    interval_ms: f64,
    last_call: Option<Instant>,
}

/// Minimum-spacing limiter with failure-driven escalation.
///
/// The interval never leaves `[base_interval, max_interval]`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let interval_ms = config.base_interval_ms as f64;
        Self {
            config,
            state: Mutex::new(LimiterState {
                interval_ms,
                last_call: None,
            }),
        }
    }

    /// Wait until the current interval has elapsed since the previous call.
    /// The first call passes immediately.
    pub async fn wait_turn(&self) {
        let wait = {
            let state = self.state.lock();
            match state.last_call {
                Some(last) => Duration::from_millis(state.interval_ms as u64)
                    .saturating_sub(last.elapsed()),
                None => Duration::ZERO,
            }
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.state.lock().last_call = Some(Instant::now());
    }

    /// Widen the interval when the failure kind signals remote pressure.
    /// Authentication and unknown failures leave the interval untouched.
    pub fn record_failure(&self, kind: ErrorKind) {
        if !kind.escalates_rate_limit() {
            return;
        }
        let mut state = self.state.lock();
        let escalated = (state.interval_ms * self.config.escalation_multiplier)
            .min(self.config.max_interval_ms as f64);
        state.interval_ms = escalated;
        if kind == ErrorKind::Quota {
            warn!(
                interval_ms = state.interval_ms as u64,
                "quota pressure: rate limiter interval escalated"
            );
        } else {
            debug!(
                kind = %kind,
                interval_ms = state.interval_ms as u64,
                "rate limiter interval escalated"
            );
        }
    }

    /// Decay the interval back toward its base after a success.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.interval_ms =
            (state.interval_ms / self.config.decay_divisor).max(self.config.base_interval_ms as f64);
    }

    /// Current enforced spacing, for diagnostics.
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.state.lock().interval_ms as u64)
    }
}
