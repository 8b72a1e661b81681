//! Circuit breaker: a Closed/Open/HalfOpen state machine protecting a call,
//! implemented with lock-free atomics on the hot path.

use crate::clock::{Clock, MonotonicClock};
use crate::config::CircuitBreakerConfig;
use crate::metrics::CircuitBreakerMetrics;
use crate::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

struct State {
    state: AtomicU8,
    /// Consecutive failures within the current rolling `interval` (Closed state).
    consecutive_failures: AtomicUsize,
    window_start_millis: AtomicU64,
    /// When Open was entered; used to compute dwell time.
    opened_at_millis: AtomicU64,
    /// In-flight probes in HalfOpen, bounded by `max_requests`.
    half_open_inflight: AtomicUsize,
    /// Consecutive successful probes in HalfOpen, needs `max_requests` to close.
    half_open_successes: AtomicUsize,
}

impl State {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicUsize::new(0),
            window_start_millis: AtomicU64::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_inflight: AtomicUsize::new(0),
            half_open_successes: AtomicUsize::new(0),
        }
    }

    fn load(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }
}

/// A named circuit breaker. Cheap to clone — all instances produced by
/// cloning share the same underlying state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<CircuitBreakerMetrics>,
    state: Arc<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            clock: Arc::new(MonotonicClock::default()),
            metrics: Arc::new(CircuitBreakerMetrics::noop()),
            state: Arc::new(State::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CircuitBreakerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state.load()
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn transition(&self, from: CircuitState, to: CircuitState) {
        self.metrics
            .transitions_total
            .with_label_values(&[&self.name, from.label(), to.label()])
            .inc();
        for candidate in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            let value = if candidate == to { 1.0 } else { 0.0 };
            self.metrics.state.with_label_values(&[&self.name, candidate.label()]).set(value);
        }
        match (from, to) {
            (CircuitState::Closed, CircuitState::Open) | (CircuitState::HalfOpen, CircuitState::Closed) => {
                tracing::info!(name = %self.name, from = from.label(), to = to.label(), "circuit breaker transition");
            }
            _ => {
                tracing::debug!(name = %self.name, from = from.label(), to = to.label(), "circuit breaker transition");
            }
        }
    }

    /// Execute `operation` under this breaker. If `token` is already
    /// cancelled, the call is not attempted and the cancellation is returned
    /// unwrapped — it is never tagged `RES-001`.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        token: &CancellationToken,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if token.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        loop {
            match self.state.load() {
                CircuitState::Open => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let elapsed_ms = self.now_millis().saturating_sub(opened_at);
                    if elapsed_ms >= self.config.timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                self.state.half_open_inflight.store(0, Ordering::Release);
                                self.state.half_open_successes.store(0, Ordering::Release);
                                self.transition(CircuitState::Open, CircuitState::HalfOpen);
                                continue;
                            }
                            Err(_) => continue,
                        }
                    }
                    self.observe_rejected();
                    return Err(ResilienceError::CircuitOpen {
                        failure_count: self.state.consecutive_failures.load(Ordering::Acquire),
                        open_duration: Duration::from_millis(elapsed_ms),
                    });
                }
                CircuitState::HalfOpen => {
                    let current = self.state.half_open_inflight.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.max_requests {
                        self.state.half_open_inflight.fetch_sub(1, Ordering::Release);
                        self.observe_rejected();
                        return Err(ResilienceError::CircuitOpen {
                            failure_count: self.state.consecutive_failures.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(0),
                        });
                    }
                    break;
                }
                CircuitState::Closed => break,
            }
        }

        let was_half_open = self.state.load() == CircuitState::HalfOpen;
        let start = self.now_millis();

        // If `operation` panics, this guard's Drop still releases the
        // half-open probe slot and counts the call as a failure — a panic
        // must never be silently dropped as neither success nor failure,
        // and it must continue unwinding past this point unchanged.
        struct PanicGuard<'a> {
            breaker: &'a CircuitBreaker,
            was_half_open: bool,
            disarmed: bool,
        }
        impl Drop for PanicGuard<'_> {
            fn drop(&mut self) {
                if self.disarmed {
                    return;
                }
                if self.was_half_open {
                    self.breaker.state.half_open_inflight.fetch_sub(1, Ordering::Release);
                }
                self.breaker.on_failure();
            }
        }
        let mut guard = PanicGuard { breaker: self, was_half_open, disarmed: false };

        let result = operation().await;
        guard.disarmed = true;
        let elapsed = Duration::from_millis(self.now_millis().saturating_sub(start));

        if was_half_open {
            self.state.half_open_inflight.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => {
                self.metrics
                    .operation_duration_seconds
                    .with_label_values(&[&self.name, "success"])
                    .observe(elapsed.as_secs_f64());
                self.on_success();
            }
            Err(ResilienceError::Cancelled) => {
                self.metrics
                    .operation_duration_seconds
                    .with_label_values(&[&self.name, "rejected"])
                    .observe(elapsed.as_secs_f64());
            }
            Err(_) => {
                self.metrics
                    .operation_duration_seconds
                    .with_label_values(&[&self.name, "failure"])
                    .observe(elapsed.as_secs_f64());
                self.on_failure();
            }
        }

        result
    }

    fn observe_rejected(&self) {
        self.metrics.operation_duration_seconds.with_label_values(&[&self.name, "rejected"]).observe(0.0);
    }

    fn on_success(&self) {
        match self.state.load() {
            CircuitState::HalfOpen => {
                let successes = self.state.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.max_requests {
                    if self
                        .state
                        .state
                        .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.state.consecutive_failures.store(0, Ordering::Release);
                        self.state.window_start_millis.store(self.now_millis(), Ordering::Release);
                        self.transition(CircuitState::HalfOpen, CircuitState::Closed);
                    }
                }
            }
            CircuitState::Closed => {
                self.state.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        match self.state.load() {
            CircuitState::HalfOpen => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    self.transition(CircuitState::HalfOpen, CircuitState::Open);
                }
            }
            CircuitState::Closed => {
                let now = self.now_millis();
                let window_start = self.state.window_start_millis.load(Ordering::Acquire);
                if window_start == 0 || now.saturating_sub(window_start) > self.config.interval.as_millis() as u64 {
                    self.state.window_start_millis.store(now, Ordering::Release);
                    self.state.consecutive_failures.store(0, Ordering::Release);
                }
                let failures = self.state.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.opened_at_millis.store(now, Ordering::Release);
                    self.transition(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }
}
