use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Exponential backoff policy for object-store operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
    /// Randomize delays to avoid thundering herds
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay after `failures` failed attempts.
    fn backoff_duration(&self, failures: u32) -> Duration {
        let scaled =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(failures as i32);
        let mut millis = (scaled as u64).min(self.max_backoff.as_millis() as u64);

        // Up to 25% jitter on top of the computed delay
        if self.jitter {
            millis += rand::thread_rng().gen_range(0..=millis / 4);
        }

        Duration::from_millis(millis)
    }
}

/// Whether waiting and trying again can plausibly help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for serac_core::Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network-level failures are generally transient
            serac_core::Error::Io(_) => true,
            // Store errors are retried only for common transient causes
            serac_core::Error::Store(msg) => {
                msg.contains("timeout")
                    || msg.contains("rate limit")
                    || msg.contains("throttle")
                    || msg.contains("temporarily unavailable")
                    || msg.contains("try again")
                    || msg.contains("503")
                    || msg.contains("429")
            }
            // Missing objects, crypto failures and user errors never
            // become true by waiting
            _ => false,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error,
/// or exhausts the attempt budget.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) if !error.is_retryable() => {
                debug!(
                    operation = operation_name,
                    error = %error,
                    "not retryable, failing immediately"
                );
                return Err(error);
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %error,
                        "giving up after exhausting retries"
                    );
                    return Err(error);
                }

                let backoff = config.backoff_duration(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
