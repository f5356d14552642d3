//! Backoff for the player API.
//!
//! The API enforces one account-wide limit, so there is exactly one
//! [`RateLimiter`] and it is owned by the queue worker. Every throttled
//! response escalates the wait; any accepted response resets it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use player_api::PlayerResult;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Capped exponential backoff: `base * multiplier^(n-1)` for the n-th
/// consecutive throttle, never more than `max`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            multiplier: 2.0,
            max: Duration::from_secs(600),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Result<Self, crate::Error> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(crate::Error::Other(format!(
                "backoff multiplier must be a finite number >= 1, got {}",
                multiplier
            )));
        }
        if max < base {
            return Err(crate::Error::Other(format!(
                "backoff cap {:?} is below the base wait {:?}",
                max, base
            )));
        }
        Ok(Self {
            base,
            multiplier,
            max,
        })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Wait after `consecutive_throttles` throttles in a row.
    pub fn wait_for(&self, consecutive_throttles: u32) -> Duration {
        if consecutive_throttles == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_throttles - 1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Snapshot of the backoff state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub consecutive_throttles: u32,
    pub last_throttle_at: Option<DateTime<Utc>>,
    pub current_wait: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    policy: BackoffPolicy,
    state: RateLimitState,
    /// Monotonic time of the last throttle, used for the actual waiting.
    last_throttle: Option<Instant>,
    observers: watch::Sender<RateLimitState>,
}

impl RateLimiter {
    pub fn new(policy: BackoffPolicy) -> Self {
        let (observers, _) = watch::channel(RateLimitState::default());
        Self {
            policy,
            state: RateLimitState::default(),
            last_throttle: None,
            observers,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Receiver that always holds the latest state.
    pub fn subscribe(&self) -> watch::Receiver<RateLimitState> {
        self.observers.subscribe()
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    /// The backoff currently in effect.
    pub fn current_wait(&self) -> Duration {
        self.state.current_wait
    }

    /// Feed a fetch outcome into the limiter.
    ///
    /// Returns the new wait if the response was a throttle.
    pub fn on_response(&mut self, result: &PlayerResult) -> Option<Duration> {
        match result {
            PlayerResult::RateLimited => Some(self.on_throttle()),
            r if r.is_accepted() => {
                self.on_success();
                None
            }
            _ => None,
        }
    }

    /// Record a throttle and return the escalated wait.
    pub fn on_throttle(&mut self) -> Duration {
        self.state.consecutive_throttles = self.state.consecutive_throttles.saturating_add(1);
        self.state.current_wait = self.policy.wait_for(self.state.consecutive_throttles);
        self.state.last_throttle_at = Some(Utc::now());
        self.last_throttle = Some(Instant::now());

        info!(
            consecutive = self.state.consecutive_throttles,
            wait_secs = self.state.current_wait.as_secs(),
            "API rate limit hit"
        );
        self.publish();
        self.state.current_wait
    }

    /// Reset to the baseline after a non-throttled response.
    pub fn on_success(&mut self) {
        if self.state.consecutive_throttles == 0 {
            return;
        }
        debug!(
            after = self.state.consecutive_throttles,
            "Rate limit backoff reset"
        );
        self.state.consecutive_throttles = 0;
        self.state.current_wait = Duration::ZERO;
        self.last_throttle = None;
        self.publish();
    }

    /// Time left before the next request may be sent.
    pub fn time_until_ready(&self) -> Duration {
        match self.last_throttle {
            Some(at) => (at + self.state.current_wait).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the backoff in effect has elapsed. Returns the time slept.
    pub async fn wait_until_ready(&self) -> Duration {
        let remaining = self.time_until_ready();
        if !remaining.is_zero() {
            debug!(wait_ms = remaining.as_millis() as u64, "Waiting out rate limit");
            tokio::time::sleep(remaining).await;
        }
        remaining
    }

    fn publish(&self) {
        self.observers.send_replace(self.state.clone());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
