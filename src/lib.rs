#![forbid(unsafe_code)]

//! # resilience-core
//!
//! Composable fault-tolerance primitives for a backend HTTP/worker service:
//! circuit breaker, bounded-concurrency bulkhead, retry with exponential
//! backoff and jitter, per-attempt timeout, and a process-wide
//! graceful-shutdown coordinator, plus a wrapper that composes them in a
//! fixed order.
//!
//! ## Layering
//!
//! [`stack::ResilientCall`] composes, outer to inner:
//! bulkhead → circuit breaker → retry → timeout → the caller's operation.
//! Timeouts are therefore per-attempt (reset on each retry), the breaker
//! sees attempts only after backoff (each retry can trip it), and the
//! bulkhead bounds total concurrent calls including their waits.
//!
//! Cancellation (a caller's own [`tokio_util::sync::CancellationToken`])
//! always short-circuits every layer as [`ResilienceError::Cancelled`] —
//! it is never re-tagged as one of the `RES-00x` codes.
//!
//! ## Quick start
//!
//! ```rust
//! use resilience_core::{ResilienceConfig, ResilienceError, ResilientCall};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[derive(Debug, Clone)]
//! # struct DownstreamError;
//! # impl std::fmt::Display for DownstreamError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "downstream error") }
//! # }
//! # impl std::error::Error for DownstreamError {}
//! #
//! async fn flaky_call(attempts: Arc<AtomicUsize>) -> Result<&'static str, ResilienceError<DownstreamError>> {
//!     if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
//!         Err(ResilienceError::Inner(DownstreamError))
//!     } else {
//!         Ok("ok")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ResilienceError<DownstreamError>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!     let config = ResilienceConfig::default();
//!     config.validate().expect("valid config");
//!
//!     let call: ResilientCall<DownstreamError> =
//!         ResilientCall::from_config("downstream-api", config).expect("valid resilient call");
//!     let token = CancellationToken::new();
//!
//!     let result = call.execute(&token, || flaky_call(attempts.clone())).await?;
//!     assert_eq!(result, "ok");
//!     Ok(())
//! }
//! ```

mod admission;
mod backoff;
mod bulkhead;
mod circuit_breaker;
mod clock;
mod config;
mod error;
mod jitter;
mod metrics;
mod retry;
mod shutdown;
mod sleeper;
mod stack;
mod timeout;

pub use admission::{ShutdownAdmissionLayer, ShutdownAdmissionService, CODE_SHUTTING_DOWN};
pub use backoff::Backoff;
pub use bulkhead::Bulkhead;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use clock::{Clock, MonotonicClock};
pub use config::{
    BulkheadConfig, CircuitBreakerConfig, ConfigError, ResilienceConfig, RetryConfig,
    ShutdownConfig, TimeoutConfig,
};
pub use error::{
    ResilienceError, CODE_BULKHEAD_FULL, CODE_CIRCUIT_OPEN, CODE_MAX_RETRIES_EXCEEDED,
    CODE_TIMEOUT_EXCEEDED,
};
pub use jitter::Jitter;
pub use metrics::{
    BulkheadMetrics, CircuitBreakerMetrics, MetricsRegistry, RetryMetrics, ShutdownMetrics,
    TimeoutMetrics,
};
pub use retry::{BuildError, Retrier, RetrierBuilder, Retryable};
pub use shutdown::{DrainTimeoutError, ShutdownCoordinator};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{CircuitBreakerFactory, ResilientCall, ResilientCallBuilder};
pub use timeout::{TimeoutConfigError, TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
