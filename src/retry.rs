//! Retry with exponential backoff and jitter.
//!
//! `delay = min(base_delay * 2^attempt + jitter, max_delay)`, where jitter is
//! uniform in `[0, 500ms)`. Attempts never overlap: each one starts only after
//! the previous one failed and its delay elapsed.

use rand::Rng;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors;

/// Upper bound (exclusive) of the random jitter added to every backoff delay.
pub const MAX_JITTER: Duration = Duration::from_millis(500);

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryObserver<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Retry configuration for a single [`with_retry`] invocation.
pub struct RetryPolicy<E> {
    /// Retries after the first attempt; `3` means at most 4 attempts.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Overrides the message-based classifier when set.
    pub is_retryable: Option<RetryPredicate<E>>,
    /// Called with `(error, attempt starting at 1, delay)` before each backoff sleep.
    pub on_retry: Option<RetryObserver<E>>,
}

impl<E> RetryPolicy<E> {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            is_retryable: None,
            on_retry: None,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.is_retryable = Some(Arc::new(predicate));
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&E, u32, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000), Duration::from_millis(10_000))
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            is_retryable: self.is_retryable.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("is_retryable", &self.is_retryable.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Backoff delay before the retry following `attempt` (0-based).
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let exponential = base.checked_mul(factor).unwrap_or(max);
    exponential.saturating_add(jitter).min(max)
}

fn random_jitter() -> Duration {
    let millis = rand::thread_rng().gen_range(0..MAX_JITTER.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries are used up. The final error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = match &policy.is_retryable {
                    Some(predicate) => predicate(&err),
                    None => errors::is_retryable(&err.to_string()),
                };
                if !retryable {
                    tracing::debug!(error = %err, attempt = attempt + 1, "Non-retryable error, giving up");
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::warn!(error = %err, attempts = attempt + 1, "Retries exhausted");
                    return Err(err);
                }

                let delay = backoff_delay(attempt, policy.base_delay, policy.max_delay, random_jitter());
                tracing::debug!(
                    error = %err,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable error, backing off"
                );
                if let Some(observer) = &policy.on_retry {
                    observer(&err, attempt + 1, delay);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
