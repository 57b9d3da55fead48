//! Retry policy and explicit backoff state.
//!
//! The backoff state is a plain value threaded through the retry loop, so
//! the wait sequence can be computed (and tested) without sleeping.

use async_trait::async_trait;
use std::time::Duration;

/// Retry configuration for extraction calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first
    pub max_attempts: u32,

    /// First backoff delay; also the value backoff resets to after a
    /// service-suggested delay
    pub initial_delay: Duration,

    /// Cap for the doubling backoff and for suggested delays
    pub max_delay: Duration,

    /// Jitter window when the service gave no suggested delay
    pub jitter: Duration,

    /// Jitter window on top of a service-suggested delay
    pub hinted_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(1000),
            hinted_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set both jitter windows. `hinted` is clamped to `jitter`.
    pub fn with_jitter(mut self, jitter: Duration, hinted: Duration) -> Self {
        self.jitter = jitter;
        self.hinted_jitter = hinted.min(jitter);
        self
    }

    /// Upper bound on the total time spent sleeping across all retries.
    pub fn max_total_wait(&self) -> Duration {
        (self.max_delay + self.jitter) * self.max_attempts.saturating_sub(1)
    }
}

/// Position in the retry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    /// Calls made so far
    pub attempt: u32,
    /// Backoff to use when the service suggests nothing
    pub current_delay: Duration,
}

impl BackoffState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            current_delay: policy.initial_delay.min(policy.max_delay),
        }
    }

    /// Whether another call is allowed after `self.attempt` calls.
    pub fn has_attempts_left(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_attempts
    }

    /// Record a call.
    pub fn record_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }

    /// Compute the wait before the next call and the state after it.
    ///
    /// `jitter_sample` is a number in `[0, 1)` scaling the jitter window.
    /// With a suggested delay the wait is that delay (capped) plus the
    /// narrow jitter and the backoff resets; without one the wait is the
    /// current backoff plus the wide jitter and the backoff doubles.
    pub fn next_wait(
        self,
        policy: &RetryPolicy,
        suggested: Option<Duration>,
        jitter_sample: f64,
    ) -> (Duration, Self) {
        let sample = jitter_sample.clamp(0.0, 1.0);

        match suggested {
            Some(hint) => {
                let wait = hint.min(policy.max_delay) + policy.hinted_jitter.mul_f64(sample);
                let next = Self {
                    current_delay: policy.initial_delay.min(policy.max_delay),
                    ..self
                };
                (wait, next)
            }
            None => {
                let wait = self.current_delay + policy.jitter.mul_f64(sample);
                let next = Self {
                    current_delay: (self.current_delay * 2).min(policy.max_delay),
                    ..self
                };
                (wait, next)
            }
        }
    }
}

/// Sleep abstraction so retry loops can run without real delays in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
