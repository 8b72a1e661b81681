//! Convenient re-exports of the crate's public surface.
pub use crate::{
    Backoff, BuildError, Bulkhead, BulkheadConfig, BulkheadMetrics, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerFactory, CircuitBreakerMetrics, CircuitState, Clock,
    ConfigError, DrainTimeoutError, Jitter, MetricsRegistry, MonotonicClock, ResilienceConfig,
    ResilienceError, ResilientCall, ResilientCallBuilder, Retrier, RetrierBuilder, RetryConfig,
    RetryMetrics, Retryable, ShutdownAdmissionLayer, ShutdownConfig, ShutdownCoordinator,
    ShutdownMetrics, Sleeper,
    TimeoutConfig, TimeoutConfigError, TimeoutMetrics, TimeoutPolicy, TokioSleeper,
    CODE_BULKHEAD_FULL, CODE_CIRCUIT_OPEN, CODE_MAX_RETRIES_EXCEEDED, CODE_SHUTTING_DOWN,
    CODE_TIMEOUT_EXCEEDED, MAX_TIMEOUT,
};
