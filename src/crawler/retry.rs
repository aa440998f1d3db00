//! Bounded retry with exponential backoff and random jitter.
//!
//! Operations report their result as an [`Outcome`] instead of raising, and
//! [`RetryPolicy::run`] drives them until success, a fatal error, or the
//! attempt cap.

use crate::{HarvestError, Result};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Why an attempt may be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// Connection failure or request timeout
    Transport(String),

    /// HTTP 429; the shared cooldown was already observed
    RateLimited,

    /// HTTP 422, transient for this provider
    Unprocessable,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Transport(message) => write!(f, "transport error: {}", message),
            RetryReason::RateLimited => write!(f, "rate limited (HTTP 429)"),
            RetryReason::Unprocessable => write!(f, "unprocessable response (HTTP 422)"),
        }
    }
}

/// Result of one attempt
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Retryable(RetryReason),
    Fatal(HarvestError),
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_factor: f64,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy that gives up after `max_attempts` attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_factor: 1.0,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Sets the exponential multiplier
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() { factor.max(0.0) } else { 1.0 };
        self
    }

    /// Sets the bounds every backoff delay is clamped to
    pub fn with_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min.min(max);
        self.max_delay = max;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound of the jitter window after failed attempt number `attempt` (1-based)
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(62) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let capped = if secs.is_finite() { secs.min(max_secs) } else { max_secs };
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Jittered delay before the next attempt
    ///
    /// Uniform over `[0, ceiling]`, then raised to the minimum delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_secs_f64();
        let jittered = if ceiling > 0.0 {
            rand::thread_rng().gen_range(0.0..=ceiling)
        } else {
            0.0
        };
        Duration::from_secs_f64(jittered).clamp(self.min_delay, self.max_delay)
    }

    /// Runs `op` until it succeeds, fails fatally, or exhausts the attempt cap
    ///
    /// # Arguments
    ///
    /// * `label` - What is being fetched, for log lines
    /// * `op` - Produces one attempt per call
    ///
    /// # Returns
    ///
    /// The first successful value, the first fatal error, or
    /// [`HarvestError::RetriesExhausted`] carrying the last retry reason.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Outcome::Success(value) => {
                    if attempt > 1 {
                        tracing::debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Outcome::Fatal(err) => return Err(err),
                Outcome::Retryable(reason) => {
                    if attempt >= self.max_attempts {
                        return Err(HarvestError::RetriesExhausted {
                            attempts: attempt,
                            last: reason.to_string(),
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Retrying {} in {:?} (attempt {}/{}): {}",
                        label,
                        delay,
                        attempt,
                        self.max_attempts,
                        reason
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}
