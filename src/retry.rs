//! Retrier: bounded retries with exponential backoff, symmetric jitter, and
//! an injectable retryability policy.

use crate::backoff::Backoff;
use crate::config::RetryConfig;
use crate::error::{ResilienceError, MAX_RETRY_FAILURES};
use crate::jitter::Jitter;
use crate::metrics::RetryMetrics;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Error types can opt into this to let the retrier's default policy defer to
/// them, mirroring the `Retryable()`/`Temporary()` escape hatch in the
/// policy described for the retrier's default classification.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaxAttempts(n) => write!(f, "max_attempts must be >= 1, got {n}"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Retries a fallible async operation with exponential backoff and symmetric
/// jitter. `MaxAttempts` counts the first call plus retries.
pub struct Retrier<E> {
    name: Arc<str>,
    max_attempts: usize,
    backoff: Backoff,
    max_delay: Duration,
    initial_delay: Duration,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<RetryMetrics>,
}

impl<E> fmt::Debug for Retrier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .field("initial_delay", &self.initial_delay)
            .finish_non_exhaustive()
    }
}

impl<E: Clone> Retrier<E> {
    pub fn builder(name: impl Into<Arc<str>>) -> RetrierBuilder<E> {
        RetrierBuilder::new(name)
    }

    pub fn from_config(name: impl Into<Arc<str>>, config: RetryConfig) -> Result<Self, BuildError> {
        RetrierBuilder::new(name)
            .max_attempts(config.max_attempts)?
            .backoff(Backoff::exponential(config.initial_delay, config.multiplier).with_max(config.max_delay))
            .initial_delay(config.initial_delay)
            .max_delay(config.max_delay)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default retryability classification for non-`Inner` variants: a
    /// per-attempt timeout is retryable (the next attempt gets a fresh
    /// deadline); a rejection surfaced from an outer layer is not (retrying
    /// would not help, and the caller should see it unchanged).
    fn default_retryable(err: &ResilienceError<E>) -> bool {
        match err {
            ResilienceError::TimeoutExceeded { .. } => true,
            ResilienceError::CircuitOpen { .. }
            | ResilienceError::BulkheadFull { .. }
            | ResilienceError::Cancelled
            | ResilienceError::Inner(_)
            | ResilienceError::MaxRetriesExceeded { .. } => false,
        }
    }

    pub async fn execute<T, Fut, Op>(
        &self,
        token: &CancellationToken,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let start = Instant::now();
        let mut failures: Vec<E> = Vec::new();
        let mut attempt = 1usize;

        loop {
            if token.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            match operation().await {
                Ok(value) => {
                    self.metrics.operations_total.with_label_values(&[&self.name, "success"]).inc();
                    self.metrics
                        .duration_seconds
                        .with_label_values(&[&self.name, "success"])
                        .observe(start.elapsed().as_secs_f64());
                    return Ok(value);
                }
                Err(ResilienceError::Cancelled) => return Err(ResilienceError::Cancelled),
                Err(err) => {
                    self.metrics
                        .attempts_total
                        .with_label_values(&[&self.name, &attempt.to_string()])
                        .inc();

                    let retryable = match &err {
                        ResilienceError::Inner(e) => (self.should_retry)(e),
                        other => Self::default_retryable(other),
                    };

                    if let ResilienceError::Inner(e) = &err {
                        if failures.len() < MAX_RETRY_FAILURES {
                            failures.push(e.clone());
                        }
                    }

                    if !retryable {
                        self.metrics.operations_total.with_label_values(&[&self.name, "failure"]).inc();
                        self.metrics
                            .duration_seconds
                            .with_label_values(&[&self.name, "failure"])
                            .observe(start.elapsed().as_secs_f64());
                        return Err(err);
                    }

                    if attempt >= self.max_attempts {
                        self.metrics.operations_total.with_label_values(&[&self.name, "exhausted"]).inc();
                        self.metrics
                            .duration_seconds
                            .with_label_values(&[&self.name, "exhausted"])
                            .observe(start.elapsed().as_secs_f64());
                        tracing::debug!(name = %self.name, attempts = attempt, "retries exhausted");
                        return Err(ResilienceError::MaxRetriesExceeded { attempts: attempt, failures });
                    }

                    let base_delay = self.backoff.delay(attempt).min(self.max_delay);
                    let delay = Jitter::symmetric(0.25, self.initial_delay).apply(base_delay);
                    tracing::debug!(name = %self.name, attempt, ?delay, "retrying after backoff");

                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = token.cancelled() => return Err(ResilienceError::Cancelled),
                    }

                    attempt += 1;
                }
            }
        }
    }
}

pub struct RetrierBuilder<E> {
    name: Arc<str>,
    max_attempts: usize,
    backoff: Backoff,
    max_delay: Duration,
    initial_delay: Duration,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<RetryMetrics>,
}

impl<E> RetrierBuilder<E> {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(100), 2.0),
            max_delay: Duration::from_secs(5),
            initial_delay: Duration::from_millis(100),
            should_retry: Arc::new(|_: &E| true),
            sleeper: Arc::new(TokioSleeper),
            metrics: Arc::new(RetryMetrics::noop()),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Result<Self, BuildError> {
        if max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(max_attempts));
        }
        self.max_attempts = max_attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn should_retry_with_trait(self) -> Self
    where
        E: Retryable,
    {
        self.should_retry(|e: &E| e.is_retryable())
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RetryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<Retrier<E>, BuildError> {
        Ok(Retrier {
            name: self.name,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            max_delay: self.max_delay,
            initial_delay: self.initial_delay,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
            metrics: self.metrics,
        })
    }
}
