//! Retry supervisor.
//!
//! An enum of backoff strategies with `delay`/`max_attempts`/`should_retry`
//! methods, `RetryPolicy{maxAttempts, initialBackoff, multiplier, maxBackoff}`
//! with an explicit recoverable-error filter, plus an `execute_with_retry`
//! supervisor function that actually drives a retried node dispatch rather
//! than just classifying delays.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GraphError;
use crate::message::Message;

/// How the delay grows between attempts (§4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Constant `initial_backoff` every attempt.
    Fixed,
    /// `initial_backoff * attempt`.
    Linear,
    /// `initial_backoff * 2^(attempt-1)`.
    Exponential,
}

/// A function classifying whether a given error should be retried. Defaults
/// to [`GraphError::is_recoverable`]; callers may narrow or widen the subset.
pub type RecoverablePredicate = Arc<dyn Fn(&GraphError) -> bool + Send + Sync>;

/// Retry policy: `maxAttempts`, `initialBackoff`, `multiplier`, `maxBackoff`,
/// and the recoverable error filter (§4.8).
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub strategy: BackoffStrategy,
    pub recoverable: RecoverablePredicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("multiplier", &self.multiplier)
            .field("max_backoff", &self.max_backoff)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, multiplier: f64, max_backoff: Duration, strategy: BackoffStrategy) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff,
            multiplier,
            max_backoff,
            strategy,
            recoverable: Arc::new(GraphError::is_recoverable),
        }
    }

    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self::new(max_attempts, interval, 1.0, interval, BackoffStrategy::Fixed)
    }

    pub fn exponential(max_attempts: u32, initial: Duration, multiplier: f64, max_backoff: Duration) -> Self {
        Self::new(max_attempts, initial, multiplier, max_backoff, BackoffStrategy::Exponential)
    }

    pub fn linear(max_attempts: u32, initial: Duration, max_backoff: Duration) -> Self {
        Self::new(max_attempts, initial, 1.0, max_backoff, BackoffStrategy::Linear)
    }

    pub fn with_recoverable(mut self, predicate: RecoverablePredicate) -> Self {
        self.recoverable = predicate;
        self
    }

    /// Delay before the attempt numbered `attempt` (1-based: the delay
    /// preceding the *second* attempt is `delay(1)`), capped at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = match self.strategy {
            BackoffStrategy::Fixed => self.initial_backoff.as_secs_f64(),
            BackoffStrategy::Linear => self.initial_backoff.as_secs_f64() * attempt as f64,
            BackoffStrategy::Exponential => {
                self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1)
            }
        };
        Duration::from_secs_f64(secs).min(self.max_backoff)
    }

    pub fn should_retry_error(&self, error: &GraphError) -> bool {
        (self.recoverable)(error)
    }
}

/// The outcome of [`execute_with_retry`] (§4.8).
pub enum RetryOutcome {
    Success(Message),
    /// Retries were exhausted; carries the last error observed.
    Exhausted(GraphError),
    /// The first error wasn't in the recoverable subset; never retried.
    NotRetryable(GraphError),
}

/// Wraps a node dispatch `body` with policy-driven retries over the
/// recoverable error subset (§4.8). `node_id` is only used for the attempt
/// counter the caller threads into `ToolInvocationContext`/tracing; it plays
/// no role in the retry decision itself.
pub async fn execute_with_retry<F, Fut>(policy: &RetryPolicy, node_id: &str, mut body: F) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Message, GraphError>>,
{
    let mut attempt = 1u32;
    loop {
        match body(attempt).await {
            Ok(msg) => return RetryOutcome::Success(msg),
            Err(err) => {
                if !policy.should_retry_error(&err) {
                    return RetryOutcome::NotRetryable(err);
                }
                if attempt >= policy.max_attempts {
                    return RetryOutcome::Exhausted(err);
                }
                let delay = policy.delay(attempt);
                super::logging::log_retry_attempt(node_id, attempt, policy.max_attempts, delay.as_millis() as u64);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
