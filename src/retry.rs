//! Generic retry loop with injected sleep and jitter collaborators.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::{self, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY},
    error::Cancelled,
};

/// Retries applied when a policy leaves `max_retries` unset.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Bounds a retry loop.
///
/// `max_retries` counts retries *after* the first attempt, so an operation
/// runs at most `max_retries + 1` times.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryPolicy {
    /// `None` means [`DEFAULT_MAX_RETRIES`].
    pub max_retries: Option<u32>,
    /// First retry delay; zero means one second.
    pub base_delay: Duration,
    /// Cap for the exponential delay; zero means thirty seconds.
    pub max_delay: Duration,
    /// Adds up to 10% random delay on top of the exponential value.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns a copy with every unset field replaced by its default.
    pub fn with_defaults(self) -> Self {
        Self {
            max_retries: Some(self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)),
            base_delay: if self.base_delay.is_zero() {
                DEFAULT_BASE_DELAY
            } else {
                self.base_delay
            },
            max_delay: if self.max_delay.is_zero() {
                DEFAULT_MAX_DELAY
            } else {
                self.max_delay
            },
            jitter: self.jitter,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }
}

/// Cancellable delay primitive.
///
/// Implementations must return [`Cancelled`] promptly once `cancel` fires and
/// must not leave timers running after returning.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, cancel: &CancellationToken, delay: Duration) -> Result<(), Cancelled>;
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, cancel: &CancellationToken, delay: Duration) -> Result<(), Cancelled> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Source of jitter samples in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

impl<F> JitterSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self) -> f64 {
        self()
    }
}

/// [`JitterSource`] drawing from the thread-local RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Retrier {
    /// Creates a retrier using tokio timers and thread-local randomness.
    ///
    /// Unset policy fields are filled in once here; the caller's value is not
    /// modified.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: policy.with_defaults(),
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(ThreadRngJitter),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_retries()
    }

    /// Exponential delay for the given 0-based attempt under this policy.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let sample = if self.policy.jitter {
            self.jitter.sample()
        } else {
            0.0
        };
        backoff::delay(
            attempt,
            self.policy.base_delay,
            self.policy.max_delay,
            self.policy.jitter,
            sample,
        )
    }

    pub async fn sleep(
        &self,
        cancel: &CancellationToken,
        delay: Duration,
    ) -> Result<(), Cancelled> {
        self.sleeper.sleep(cancel, delay).await
    }

    /// Invokes `operation` until it succeeds, `should_retry` rejects its error,
    /// or the retry budget is spent.
    ///
    /// The operation receives the 0-based attempt index. The last error is
    /// returned unchanged. Firing `cancel` while an attempt is in flight or
    /// during the wait between attempts ends the loop with
    /// `E::from(Cancelled)`; an already-fired token skips the first attempt.
    pub async fn run<T, E, P, F, Fut>(
        &self,
        cancel: &CancellationToken,
        should_retry: P,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: From<Cancelled> + fmt::Display,
        P: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_retries = self.max_retries();
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(E::from(Cancelled));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::from(Cancelled)),
                outcome = operation(attempt) => outcome,
            };
            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !should_retry(&err) || attempt >= max_retries {
                return Err(err);
            }

            let delay = self.backoff(attempt);

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, ?delay, error = %err, "retrying operation");

            self.sleep(cancel, delay).await?;
            attempt += 1;
        }
    }
}
