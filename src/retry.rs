//! Bounded retries with exponential backoff and jitter.
//!
//! Wrapped operations must be safe to repeat. Nothing here enforces that.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Retries after the first attempt; total attempts are `max_retries + 1`
  pub max_retries: u32,
  /// Delay before the first retry, before jitter
  pub initial_delay: Duration,
  /// Multiplier applied per retry, must be > 1
  pub backoff_factor: f64,
  /// Lower bound of the jitter multiplier
  pub jitter_min: f64,
  /// Upper bound of the jitter multiplier
  pub jitter_max: f64,
  /// Ceiling for the actual sleep, jitter included.
  ///
  /// Delays grow with each retry only until they reach this ceiling; from
  /// there on every retry waits exactly `max_delay`.
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      initial_delay: Duration::from_millis(1000),
      backoff_factor: 2.0,
      jitter_min: 0.5,
      jitter_max: 1.0,
      max_delay: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
    Self {
      max_retries,
      initial_delay,
      ..Self::default()
    }
  }

  /// Delay before retry number `retry` (1-based) for a given jitter multiplier.
  pub fn delay_for(&self, retry: u32, jitter: f64) -> Duration {
    let exponent = retry.saturating_sub(1) as i32;
    let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
    let jittered = (base * jitter).min(self.max_delay.as_secs_f64());
    Duration::from_secs_f64(jittered.max(0.0))
  }

  /// Delay before retry number `retry` with jitter drawn from `rng`.
  pub fn sample_delay<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
    let jitter = if self.jitter_max > self.jitter_min {
      rng.gen_range(self.jitter_min..=self.jitter_max)
    } else {
      self.jitter_max
    };
    self.delay_for(retry, jitter)
  }
}

/// Run `op` until it succeeds or the policy's retries are exhausted.
///
/// Every failure is retried regardless of its kind. The last error is
/// returned unchanged.
pub async fn with_retry<T, E, F, Fut>(op: F, policy: &RetryPolicy) -> Result<T, E>
where
  E: Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  with_retry_if(op, policy, |_| true).await
}

/// Like [`with_retry`], but gives up immediately when `should_retry` rejects an error.
pub async fn with_retry_if<T, E, F, Fut, P>(
  mut op: F,
  policy: &RetryPolicy,
  should_retry: P,
) -> Result<T, E>
where
  E: Display,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  P: Fn(&E) -> bool,
{
  let mut attempt: u32 = 0;

  loop {
    match op().await {
      Ok(value) => {
        if attempt > 0 {
          debug!(attempts = attempt + 1, "Operation succeeded after retry");
        }
        return Ok(value);
      }
      Err(err) => {
        if attempt >= policy.max_retries {
          error!(attempts = attempt + 1, error = %err, "Operation failed, retries exhausted");
          return Err(err);
        }
        if !should_retry(&err) {
          warn!(attempts = attempt + 1, error = %err, "Operation failed with non-retryable error");
          return Err(err);
        }

        attempt += 1;
        let delay = policy.sample_delay(attempt, &mut rand::thread_rng());
        warn!(
          attempt,
          max_retries = policy.max_retries,
          delay_ms = delay.as_millis() as u64,
          error = %err,
          "Operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
      }
    }
  }
}
