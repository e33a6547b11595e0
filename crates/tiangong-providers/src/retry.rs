//! Retry with exponential backoff and jitter for vendor calls.
//!
//! Errors are classified as recoverable or not; only recoverable ones are
//! retried, and never after a stream has started delivering windows.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::ProviderError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10000;

const JITTER_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorType {
    Recoverable(RecoverableError),
    NonRecoverable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoverableError {
    RateLimit,
    NetworkError,
    /// Server error (5xx)
    ServerError,
    ModelBusy,
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, 0, 0)
    }

    /// Delay before retrying after `attempt` failures:
    /// `base * 2^(attempt-1)`, capped, then moved by up to ±30%.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay.as_millis() as u64);

        let mut rng = rand::thread_rng();
        let jitter = (capped as f64 * JITTER_FACTOR * rng.gen::<f64>()) as u64;
        let final_delay = if rng.gen_bool(0.5) {
            capped + jitter
        } else {
            capped.saturating_sub(jitter)
        };

        Duration::from_millis(final_delay)
    }
}

/// Classify an error as recoverable or non-recoverable.
pub fn classify_error(error: &anyhow::Error) -> ErrorType {
    if let Some(provider_error) = error.downcast_ref::<ProviderError>() {
        if provider_error.is_fatal() {
            return ErrorType::NonRecoverable;
        }
        match provider_error {
            ProviderError::Api { status, .. } => {
                return match status.as_u16() {
                    429 => ErrorType::Recoverable(RecoverableError::RateLimit),
                    503 => ErrorType::Recoverable(RecoverableError::ModelBusy),
                    code if code >= 500 => ErrorType::Recoverable(RecoverableError::ServerError),
                    _ => ErrorType::NonRecoverable,
                };
            }
            ProviderError::Http(e) => {
                if e.is_timeout() {
                    return ErrorType::Recoverable(RecoverableError::Timeout);
                }
                if e.is_connect() || e.is_request() {
                    return ErrorType::Recoverable(RecoverableError::NetworkError);
                }
            }
            _ => {}
        }
    }

    if let Some(e) = error.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return ErrorType::Recoverable(RecoverableError::Timeout);
        }
        if e.is_connect() {
            return ErrorType::Recoverable(RecoverableError::NetworkError);
        }
    }

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("rate limit") || error_str.contains("rate_limit") || error_str.contains("429") {
        return ErrorType::Recoverable(RecoverableError::RateLimit);
    }

    if error_str.contains("network")
        || error_str.contains("connection")
        || error_str.contains("dns")
        || error_str.contains("refused")
    {
        return ErrorType::Recoverable(RecoverableError::NetworkError);
    }

    if error_str.contains("busy") || error_str.contains("overloaded") || error_str.contains("unavailable") {
        return ErrorType::Recoverable(RecoverableError::ModelBusy);
    }

    if error_str.contains("500")
        || error_str.contains("502")
        || error_str.contains("504")
        || error_str.contains("server error")
    {
        return ErrorType::Recoverable(RecoverableError::ServerError);
    }

    if error_str.contains("timeout") || error_str.contains("timed out") {
        return ErrorType::Recoverable(RecoverableError::Timeout);
    }

    ErrorType::NonRecoverable
}

/// Run `operation` until it succeeds, fails non-recoverably, or the policy's
/// attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("Operation '{}' succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(error) => match classify_error(&error) {
                ErrorType::Recoverable(recoverable_type) => {
                    if attempt >= policy.max_attempts {
                        error!(
                            "Operation '{}' failed after {} attempts. Giving up.",
                            operation_name, attempt
                        );
                        return Err(error);
                    }

                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Recoverable error ({:?}) in '{}' (attempt {}/{}). Retrying in {:?}...",
                        recoverable_type, operation_name, attempt, policy.max_attempts, delay
                    );
                    warn!("Error details: {}", error);

                    tokio::time::sleep(delay).await;
                }
                ErrorType::NonRecoverable => {
                    error!(
                        "Non-recoverable error in '{}' (attempt {}): {}",
                        operation_name, attempt, error
                    );
                    return Err(error);
                }
            },
        }
    }
}
