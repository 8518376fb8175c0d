//! Bounded exponential-backoff retry with failure classification.
//!
//! [`with_retry`] re-runs a fallible async operation while the failure is
//! classified as retryable and the retry budget is not spent. The delay
//! before retry `n` is `base_delay * 2^(n-1)`: with the defaults that is
//! 1s, 2s, 4s. Terminal failures are returned immediately, annotated with
//! the policy's context string.
//!
//! # Example
//!
//! ```ignore
//! use digest_forge::retry::{with_default_retry, RetryPolicy};
//!
//! let policy = RetryPolicy::new("fetch readme").with_max_retries(2);
//! let readme = with_default_retry(&policy, || source.supplementary_text(&item)).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ExternalError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Largest exponent applied to the base delay.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Classifies whether a failure is worth another attempt.
pub trait Transient {
    /// Returns `true` for failures that may succeed on a later attempt.
    fn is_transient(&self) -> bool;
}

impl Transient for ExternalError {
    fn is_transient(&self) -> bool {
        match self {
            ExternalError::Network { .. } | ExternalError::Timeout(_) => true,
            ExternalError::Http { status, .. } if *status == 429 || *status >= 500 => true,
            other => other.to_string().to_lowercase().contains("timeout"),
        }
    }
}

/// Retry budget and backoff for one kind of operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for every retry after that.
    pub base_delay: Duration,
    /// Human readable label attached to logs and to the final error.
    pub context: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            context: "operation".to_string(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default budget for the given context.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    /// Sets the number of retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Returns a copy of this policy labelled with a different context.
    pub fn with_context(&self, context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..self.clone()
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let shift = (retry - 1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// The last error of a failed retry loop, annotated with its context.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Context of the policy that gave up.
    pub context: String,
    /// Attempts made, including the first one.
    pub attempts: u32,
    /// Whether the last error was classified as retryable.
    pub retryable: bool,
    /// The error returned by the last attempt.
    pub source: E,
}

impl<E> RetryError<E> {
    /// Consumes the annotation and returns the underlying error.
    pub fn into_inner(self) -> E {
        self.source
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.context, self.attempts, self.source
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Runs `operation` until it succeeds, fails terminally, or the budget runs out.
///
/// Emits exactly one log line per attempt.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        context = %policy.context,
                        attempt = attempt + 1,
                        "Succeeded after retry"
                    );
                } else {
                    debug!(context = %policy.context, "Succeeded on first attempt");
                }
                return Ok(value);
            }
            Err(err) => {
                let retryable = is_retryable(&err);
                if !retryable || attempt >= policy.max_retries {
                    error!(
                        context = %policy.context,
                        attempt = attempt + 1,
                        max_attempts = policy.max_retries + 1,
                        retryable,
                        error = %err,
                        "Giving up"
                    );
                    return Err(RetryError {
                        context: policy.context.clone(),
                        attempts: attempt + 1,
                        retryable,
                        source: err,
                    });
                }

                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    context = %policy.context,
                    attempt,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`with_retry`] using the error type's own [`Transient`] classification.
pub async fn with_default_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + fmt::Display,
{
    with_retry(policy, operation, |err: &E| err.is_transient()).await
}
