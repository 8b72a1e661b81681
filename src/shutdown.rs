//! Graceful shutdown coordination: tracks in-flight requests and gives them a
//! bounded drain period before the process exits.

use crate::config::ShutdownConfig;
use crate::metrics::ShutdownMetrics;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Returned by [`ShutdownCoordinator::wait_for_drain`] when the drain period
/// (or the caller's own token) fires before active requests reached zero.
/// Names the number of requests still outstanding at that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainTimeoutError {
    pub remaining_active: usize,
}

impl fmt::Display for DrainTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shutdown drain timed out with {} request(s) still active",
            self.remaining_active
        )
    }
}

impl std::error::Error for DrainTimeoutError {}

struct State {
    active: AtomicUsize,
    shutting_down: AtomicBool,
}

/// Coordinates admission and draining during shutdown. `increment_active`
/// is the admission gate: once shutdown has been initiated it always
/// refuses, rolling back the counter it would otherwise have bumped.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    state: Arc<State>,
    metrics: Arc<ShutdownMetrics>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            state: Arc::new(State { active: AtomicUsize::new(0), shutting_down: AtomicBool::new(false) }),
            metrics: Arc::new(ShutdownMetrics::noop()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ShutdownMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.shutting_down.load(Ordering::Acquire)
    }

    /// Admits one more in-flight request. Returns `false` without admitting
    /// if shutdown has already been initiated.
    pub fn increment_active(&self) -> bool {
        if self.state.shutting_down.load(Ordering::Acquire) {
            self.metrics.rejections_total.inc();
            return false;
        }
        self.state.active.fetch_add(1, Ordering::AcqRel);
        self.metrics.active_requests.inc();
        true
    }

    /// Releases one previously-admitted in-flight request. Clamped at zero;
    /// an imbalanced call (more decrements than increments) is logged rather
    /// than allowed to wrap the counter.
    pub fn decrement_active(&self) {
        let previous = self.state.active.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            if n == 0 {
                None
            } else {
                Some(n - 1)
            }
        });
        if previous.is_err() {
            tracing::warn!("decrement_active called with no active requests outstanding");
            return;
        }
        self.metrics.active_requests.dec();
    }

    /// Idempotent: only the first call flips the flag and is reported as
    /// having initiated shutdown.
    pub fn initiate_shutdown(&self) -> bool {
        let first = self
            .state
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.metrics.shutdown_in_progress.set(1.0);
            tracing::info!("shutdown initiated, draining active requests");
        }
        first
    }

    /// Waits for active requests to reach zero, polling roughly every 100ms,
    /// bounded by `drain_period`. Returns `Ok(())` if the drain completed
    /// cleanly, or `Err(DrainTimeoutError)` naming the requests still active
    /// if the drain period elapsed first or `token` fired.
    pub async fn wait_for_drain(&self, token: &CancellationToken) -> Result<(), DrainTimeoutError> {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_millis(100));

        let drained = loop {
            if self.active() == 0 {
                break true;
            }
            if start.elapsed() >= self.config.drain_period {
                break false;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = token.cancelled() => break false,
            }
        };

        let result_label = if drained { "drained" } else { "timed_out" };
        self.metrics
            .shutdown_duration_seconds
            .with_label_values(&[result_label])
            .observe(start.elapsed().as_secs_f64());

        if drained {
            tracing::info!(drained, elapsed = ?start.elapsed(), "shutdown drain complete");
            Ok(())
        } else {
            let remaining_active = self.active();
            tracing::warn!(
                drained,
                elapsed = ?start.elapsed(),
                remaining_active,
                "shutdown drain timed out with requests still active"
            );
            Err(DrainTimeoutError { remaining_active })
        }
    }

    /// Grace period to allow after a successful drain before the process
    /// actually exits (e.g. letting load balancers deregister the instance).
    pub fn grace_period(&self) -> Duration {
        self.config.grace_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_decrement_track_active_count() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        assert!(coordinator.increment_active());
        assert!(coordinator.increment_active());
        assert_eq!(coordinator.active(), 2);
        coordinator.decrement_active();
        assert_eq!(coordinator.active(), 1);
    }

    #[test]
    fn decrement_below_zero_is_clamped() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator.decrement_active();
        assert_eq!(coordinator.active(), 0);
    }

    #[test]
    fn initiate_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        assert!(coordinator.initiate_shutdown());
        assert!(!coordinator.initiate_shutdown());
        assert!(coordinator.is_shutting_down());
    }

    #[test]
    fn increment_active_refuses_once_shutdown_initiated() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator.initiate_shutdown();
        assert!(!coordinator.increment_active());
        assert_eq!(coordinator.active(), 0);
    }

    #[tokio::test]
    async fn wait_for_drain_returns_true_once_active_reaches_zero() {
        tokio::time::pause();
        let coordinator = ShutdownCoordinator::new(ShutdownConfig {
            drain_period: Duration::from_secs(5),
            grace_period: Duration::from_secs(1),
        });
        coordinator.increment_active();
        let token = CancellationToken::new();

        let coordinator_clone = coordinator.clone();
        let waiter = tokio::spawn(async move { coordinator_clone.wait_for_drain(&CancellationToken::new()).await });

        tokio::time::advance(Duration::from_millis(150)).await;
        coordinator.decrement_active();
        tokio::time::advance(Duration::from_millis(150)).await;

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
        let _ = token;
    }

    #[tokio::test]
    async fn wait_for_drain_times_out_after_drain_period() {
        tokio::time::pause();
        let coordinator = ShutdownCoordinator::new(ShutdownConfig {
            drain_period: Duration::from_millis(200),
            grace_period: Duration::from_secs(1),
        });
        coordinator.increment_active();
        let token = CancellationToken::new();

        let coordinator_clone = coordinator.clone();
        let waiter = tokio::spawn(async move { coordinator_clone.wait_for_drain(&token).await });

        tokio::time::advance(Duration::from_millis(300)).await;
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.remaining_active, 1);
    }

    #[tokio::test]
    async fn wait_for_drain_stops_early_on_cancellation() {
        tokio::time::pause();
        let coordinator = ShutdownCoordinator::new(ShutdownConfig {
            drain_period: Duration::from_secs(30),
            grace_period: Duration::from_secs(1),
        });
        coordinator.increment_active();
        let token = CancellationToken::new();
        token.cancel();

        let err = coordinator.wait_for_drain(&token).await.unwrap_err();
        assert_eq!(err.remaining_active, 1);
    }
}
