//! Bounded retry with backoff for transient transport failures.
//!
//! Only connection-level failures are ever retried. A command that ran and
//! exited non-zero is a result, not an error, and never reaches this code.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::ConnectionError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// delay * multiplier^attempt.
    Exponential,
    /// Exponential with random jitter applied.
    #[default]
    ExponentialWithJitter,
}

/// Retry behaviour for remote operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of the delay (0.0 to 1.0) randomly added or removed.
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Whether a connect timeout counts as transient.
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
}

fn default_max_retries() -> u32 {
    1
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            strategy: BackoffStrategy::default(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
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

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => self
                .initial_delay
                .mul_f64(self.multiplier.powi(attempt as i32)),
        };
        let capped = base.min(self.max_delay);

        if self.strategy != BackoffStrategy::ExponentialWithJitter || self.jitter <= 0.0 {
            return capped;
        }

        let range = capped.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }

    /// Whether `error` is a transient transport failure worth another attempt.
    pub fn is_retryable(&self, error: &ConnectionError) -> bool {
        match error {
            ConnectionError::Timeout(_) => self.retry_on_timeout,
            ConnectionError::ConnectionFailed(_)
            | ConnectionError::ConnectionClosed
            | ConnectionError::SshError(_) => true,
            ConnectionError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            ConnectionError::AuthenticationFailed(_)
            | ConnectionError::ExecutionFailed(_)
            | ConnectionError::TransferFailed(_)
            | ConnectionError::InvalidConfig(_)
            | ConnectionError::DockerError(_)
            | ConnectionError::UnsupportedOperation(_) => false,
        }
    }
}

/// What happened across all attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub failed_attempts: u32,
    /// Time spent sleeping between attempts.
    pub wait_duration: Duration,
    pub total_duration: Duration,
    pub errors: Vec<String>,
}

/// Result of [`retry`] plus its statistics.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub result: Result<T, ConnectionError>,
    pub stats: RetryStats,
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn attempts(&self) -> u32 {
        self.stats.total_attempts
    }

    pub fn into_result(self) -> Result<T, ConnectionError> {
        self.result
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// `on_retry` is called with the failed attempt's error before sleeping, so
/// callers can drop state tied to the broken connection.
pub async fn retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: R,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectionError>>,
    R: FnMut(&ConnectionError),
{
    let start = Instant::now();
    let mut stats = RetryStats::default();
    let mut attempt = 0u32;

    loop {
        trace!(attempt, "Starting attempt");
        stats.total_attempts += 1;

        let error = match operation().await {
            Ok(value) => {
                stats.total_duration = start.elapsed();
                debug!(attempts = stats.total_attempts, "Operation succeeded");
                return RetryResult {
                    result: Ok(value),
                    stats,
                };
            }
            Err(e) => e,
        };

        stats.failed_attempts += 1;
        stats.errors.push(error.to_string());

        if !policy.is_retryable(&error) || attempt >= policy.max_retries {
            stats.total_duration = start.elapsed();
            if attempt > 0 {
                warn!(attempts = stats.total_attempts, error = %error, "All retry attempts exhausted");
            } else {
                debug!(error = %error, "Not retrying");
            }
            return RetryResult {
                result: Err(error),
                stats,
            };
        }

        on_retry(&error);
        let delay = policy.delay_for_attempt(attempt);
        warn!(attempt, delay = ?delay, error = %error, "Transient failure, retrying");
        stats.wait_duration += delay;
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
