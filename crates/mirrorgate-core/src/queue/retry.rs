//! Retry policy: bounded attempts with clamped exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrySettings;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Retry policy for backend calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay after the first failure, and the floor for every delay.
    pub min_delay: Duration,

    /// Ceiling for every delay.
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// 3 attempts, 1s..10s, doubling.
    pub fn default_backend() -> Self {
        Self::from_settings(&RetrySettings::default())
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }

    /// Delay to wait after `attempts` failures (1-indexed).
    ///
    /// delay = clamp(min_delay * multiplier^(attempts - 1), min_delay, max_delay)
    ///
    /// With min=1s, max=10s, multiplier=2.0:
    /// - after attempt 1: 1s
    /// - after attempt 2: 2s
    /// - after attempt 5: 10s (clamped)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.min_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        let max_secs = self.max_delay.as_secs_f64();
        let delay_secs = if delay_secs.is_finite() {
            delay_secs.clamp(base_secs.min(max_secs), max_secs)
        } else {
            max_secs
        };
        Duration::from_secs_f64(delay_secs)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only errors whose `is_transient()` is true are retried; application
    /// rejections surface on the first attempt.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    debug!(operation, error = %err, "permanent backend error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.next_delay(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient backend error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
