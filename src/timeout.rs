//! Per-attempt timeout: bounds a single operation's duration and tags the
//! deadline as `RES-003` only when the timeout itself fired, never when the
//! caller's own cancellation token was the actual cause.

use crate::metrics::TimeoutMetrics;
use crate::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound on a configured timeout (30 days), to catch accidental
/// `Duration::MAX`-style misconfiguration rather than silently hanging a
/// process for an implausible duration.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutConfigError {
    ZeroDuration,
    ExceedsMaximum { requested: Duration, limit: Duration },
}

impl std::fmt::Display for TimeoutConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroDuration => write!(f, "timeout duration must be > 0"),
            Self::ExceedsMaximum { requested, limit } => {
                write!(f, "timeout duration {requested:?} exceeds maximum allowed {limit:?}")
            }
        }
    }
}

impl std::error::Error for TimeoutConfigError {}

/// Enforces a maximum duration on a single async operation.
#[derive(Clone)]
pub struct TimeoutPolicy {
    name: Arc<str>,
    duration: Duration,
    metrics: Arc<TimeoutMetrics>,
}

impl TimeoutPolicy {
    #[must_use = "the result must be checked for validation errors"]
    pub fn new(name: impl Into<Arc<str>>, duration: Duration) -> Result<Self, TimeoutConfigError> {
        Self::new_with_max(name, duration, MAX_TIMEOUT)
    }

    pub fn new_with_max(
        name: impl Into<Arc<str>>,
        duration: Duration,
        max: Duration,
    ) -> Result<Self, TimeoutConfigError> {
        if duration.is_zero() {
            return Err(TimeoutConfigError::ZeroDuration);
        }
        if duration > max {
            return Err(TimeoutConfigError::ExceedsMaximum { requested: duration, limit: max });
        }
        Ok(Self { name: name.into(), duration, metrics: Arc::new(TimeoutMetrics::noop()) })
    }

    /// Preset matching the default outbound operation budget.
    pub fn default_preset(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Duration::from_secs(30)).expect("default preset is always valid")
    }

    /// Preset matching the tighter database-call budget.
    pub fn for_database(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Duration::from_secs(5)).expect("database preset is always valid")
    }

    /// Preset matching the looser external-API-call budget.
    pub fn for_external_api(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Duration::from_secs(10)).expect("external API preset is always valid")
    }

    pub fn with_metrics(mut self, metrics: Arc<TimeoutMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Runs `operation` under both the configured deadline and `token`. The
    /// operation receives a child token derived from `token` so the deadline
    /// and the caller's cancellation compose: whichever fires first ends the
    /// attempt, but only the deadline is reported as [`ResilienceError::TimeoutExceeded`].
    /// Parent cancellation is always reported as [`ResilienceError::Cancelled`],
    /// never tagged with `RES-003`.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        token: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce(CancellationToken) -> Fut + Send,
    {
        if token.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let child = token.child_token();
        let start = Instant::now();

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                child.cancel();
                Err(ResilienceError::Cancelled)
            }
            result = tokio::time::timeout(self.duration, operation(child.clone())) => {
                match result {
                    Ok(Ok(value)) => {
                        self.metrics
                            .operation_duration_seconds
                            .with_label_values(&[&self.name, "success"])
                            .observe(start.elapsed().as_secs_f64());
                        Ok(value)
                    }
                    Ok(Err(ResilienceError::Cancelled)) => Err(ResilienceError::Cancelled),
                    Ok(Err(err)) => {
                        self.metrics
                            .operation_duration_seconds
                            .with_label_values(&[&self.name, "failure"])
                            .observe(start.elapsed().as_secs_f64());
                        Err(err)
                    }
                    Err(_) => {
                        child.cancel();
                        let elapsed = start.elapsed();
                        self.metrics
                            .operation_duration_seconds
                            .with_label_values(&[&self.name, "timeout"])
                            .observe(elapsed.as_secs_f64());
                        tracing::debug!(name = %self.name, ?elapsed, timeout = ?self.duration, "operation timed out");
                        Err(ResilienceError::TimeoutExceeded { elapsed, timeout: self.duration })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn completes_before_timeout() {
        let policy = TimeoutPolicy::new("test", Duration::from_millis(100)).unwrap();
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = policy
            .execute(&token, |_child| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn times_out_long_operation() {
        tokio::time::pause();
        let policy = TimeoutPolicy::new("test", Duration::from_millis(50)).unwrap();
        let token = CancellationToken::new();

        let fut = policy.execute(&token, |_child| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, ResilienceError<TestError>>(42)
        });

        tokio::pin!(fut);
        tokio::time::advance(Duration::from_millis(51)).await;
        let result = fut.await;

        assert!(result.as_ref().unwrap_err().is_timeout_exceeded());
    }

    #[tokio::test]
    async fn propagates_operation_errors() {
        let policy = TimeoutPolicy::new("test", Duration::from_secs(1)).unwrap();
        let token = CancellationToken::new();

        let result = policy
            .execute(&token, |_child| async {
                Err::<(), _>(ResilienceError::Inner(TestError("operation failed".to_string())))
            })
            .await;

        match result.unwrap_err() {
            ResilienceError::Inner(e) => assert_eq!(e.0, "operation failed"),
            e => panic!("expected Inner error, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn parent_cancellation_is_never_tagged_as_timeout() {
        let policy = TimeoutPolicy::new("test", Duration::from_secs(10)).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<(), ResilienceError<TestError>> = policy
            .execute(&token, |_child| async {
                tokio::time::sleep(Duration::from_secs(100)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
    }

    #[tokio::test]
    async fn child_token_is_cancelled_when_deadline_fires() {
        tokio::time::pause();
        let policy = TimeoutPolicy::new("test", Duration::from_millis(10)).unwrap();
        let token = CancellationToken::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();

        let fut = policy.execute(&token, move |child| {
            let observed = observed_clone.clone();
            async move {
                child.cancelled().await;
                observed.store(1, Ordering::SeqCst);
                Ok::<(), ResilienceError<TestError>>(())
            }
        });

        tokio::pin!(fut);
        tokio::time::advance(Duration::from_millis(20)).await;
        let _ = tokio::time::timeout(Duration::from_millis(50), fut).await;
    }

    #[test]
    fn rejects_zero_duration() {
        let err = TimeoutPolicy::new("test", Duration::ZERO).unwrap_err();
        assert!(matches!(err, TimeoutConfigError::ZeroDuration));
    }

    #[test]
    fn rejects_excessive_duration() {
        let too_big = MAX_TIMEOUT + Duration::from_secs(1);
        let err = TimeoutPolicy::new("test", too_big).unwrap_err();
        assert!(
            matches!(err, TimeoutConfigError::ExceedsMaximum { requested, limit } if requested == too_big && limit == MAX_TIMEOUT)
        );
    }

    #[test]
    fn presets_match_documented_defaults() {
        assert_eq!(TimeoutPolicy::default_preset("p").duration(), Duration::from_secs(30));
        assert_eq!(TimeoutPolicy::for_database("p").duration(), Duration::from_secs(5));
        assert_eq!(TimeoutPolicy::for_external_api("p").duration(), Duration::from_secs(10));
    }
}
