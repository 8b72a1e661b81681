//! Composes the four call-path primitives into a single resilient call,
//! plus a factory for reusing named circuit breakers across call sites.

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{BulkheadConfig, CircuitBreakerConfig, ResilienceConfig, RetryConfig, TimeoutConfig};
use crate::retry::{BuildError, Retrier};
use crate::timeout::TimeoutPolicy;
use crate::ResilienceError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Memoizes named circuit breakers so call sites sharing a name (e.g. the
/// same downstream dependency, reached from several places) share failure
/// bookkeeping instead of each tracking its own.
#[derive(Clone, Default)]
pub struct CircuitBreakerFactory {
    inner: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the circuit breaker registered under `name`, creating one
    /// with `config` if this is the first request for that name. `config`
    /// is ignored on subsequent calls for an already-created name.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        let mut breakers = self.inner.lock().unwrap();
        breakers.entry(name.to_string()).or_insert_with(|| CircuitBreaker::new(name, config)).clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

/// A single named call path composing, from outside in: bulkhead, circuit
/// breaker, retry, per-attempt timeout, then the caller's operation. A
/// bulkhead rejection or an open breaker is never itself retried; the
/// retrier only ever sees what the timeout layer (or the operation itself)
/// produces.
#[derive(Clone)]
pub struct ResilientCall<E> {
    name: Arc<str>,
    bulkhead: Bulkhead,
    circuit_breaker: CircuitBreaker,
    retrier: Arc<Retrier<E>>,
    timeout: TimeoutPolicy,
}

impl<E> ResilientCall<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn builder(name: impl Into<Arc<str>>) -> ResilientCallBuilder<E> {
        ResilientCallBuilder::new(name)
    }

    pub fn from_config(name: impl Into<Arc<str>>, config: ResilienceConfig) -> Result<Self, BuildError> {
        let name = name.into();
        ResilientCallBuilder::new(name)
            .bulkhead_config(config.bulkhead)
            .circuit_breaker_config(config.circuit_breaker)
            .retry_config(config.retry)?
            .timeout_duration(config.timeout.default)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Runs `operation` through bulkhead → circuit breaker → retry → timeout
    /// and the operation itself. The whole call runs under a single
    /// `resilience.execute` span; each layer records its own entry event
    /// (`bulkhead.acquire`, `circuit_breaker.check`, `retry.start`,
    /// `timeout.start`) carrying that layer's identifying attributes, and
    /// completion records the span's `error.type` (via
    /// [`ResilienceError::error_type`]) plus a debug log of the same.
    pub async fn execute<T, Fut, Op>(&self, token: &CancellationToken, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let span = tracing::info_span!(
            "resilience.execute",
            operation = %self.name,
            "error.type" = tracing::field::Empty,
        );
        let op_cell = Arc::new(Mutex::new(operation));
        let bulkhead = self.bulkhead.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let retrier = self.retrier.clone();
        let timeout = self.timeout.clone();
        let token = token.clone();
        let name = self.name.clone();
        let start = tokio::time::Instant::now();

        async move {
            let result = bulkhead
                .execute(&token, || {
                    let op_cell = op_cell.clone();
                    let circuit_breaker = circuit_breaker.clone();
                    let retrier = retrier.clone();
                    let timeout = timeout.clone();
                    let bulkhead = bulkhead.clone();
                    let token = token.clone();
                    async move {
                        tracing::debug!(
                            bulkhead = %bulkhead.name(),
                            waiting = bulkhead.waiting_count(),
                            active = bulkhead.active_count(),
                            "bulkhead.acquire"
                        );
                        circuit_breaker
                            .execute(&token, || {
                                let op_cell = op_cell.clone();
                                let retrier = retrier.clone();
                                let timeout = timeout.clone();
                                let circuit_breaker = circuit_breaker.clone();
                                let token = token.clone();
                                async move {
                                    tracing::debug!(
                                        breaker = %circuit_breaker.name(),
                                        state = ?circuit_breaker.state(),
                                        "circuit_breaker.check"
                                    );
                                    retrier
                                        .execute(&token, || {
                                            let op_cell = op_cell.clone();
                                            let timeout = timeout.clone();
                                            let retrier = retrier.clone();
                                            let token = token.clone();
                                            async move {
                                                tracing::debug!(retrier = %retrier.name(), "retry.start");
                                                timeout
                                                    .execute(&token, |child| {
                                                        let op_cell = op_cell.clone();
                                                        let timeout = timeout.clone();
                                                        async move {
                                                            tracing::debug!(
                                                                timeout_name = %timeout.name(),
                                                                duration = ?timeout.duration(),
                                                                "timeout.start"
                                                            );
                                                            let mut op = op_cell.lock().unwrap();
                                                            let _ = &child;
                                                            op()
                                                        }
                                                        .await
                                                    })
                                                    .await
                                            }
                                        })
                                        .await
                                }
                            })
                            .await
                    }
                })
                .await;

            let error_type = match &result {
                Ok(_) => "none",
                Err(err) => err.error_type(),
            };
            let current_span = tracing::Span::current();
            current_span.record("error.type", error_type);
            tracing::debug!(
                operation = %name,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "error.type" = error_type,
                "resilience.execute complete"
            );

            result
        }
        .instrument(span)
        .await
    }
}

pub struct ResilientCallBuilder<E> {
    name: Arc<str>,
    bulkhead_config: BulkheadConfig,
    circuit_breaker_config: CircuitBreakerConfig,
    circuit_breaker_override: Option<CircuitBreaker>,
    retry_config: RetryConfig,
    timeout_duration: std::time::Duration,
}

impl<E> ResilientCallBuilder<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            bulkhead_config: BulkheadConfig::default(),
            circuit_breaker_config: CircuitBreakerConfig::default(),
            circuit_breaker_override: None,
            retry_config: RetryConfig::default(),
            timeout_duration: TimeoutConfig::default().default,
        }
    }

    pub fn bulkhead_config(mut self, config: BulkheadConfig) -> Self {
        self.bulkhead_config = config;
        self
    }

    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker_config = config;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Result<Self, BuildError> {
        self.retry_config = config;
        Ok(self)
    }

    pub fn timeout_duration(mut self, duration: std::time::Duration) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Uses a shared factory so breakers named the same across call sites
    /// (e.g. every call to the same downstream) share one breaker instance,
    /// instead of each builder creating its own.
    pub fn with_factory(mut self, factory: &CircuitBreakerFactory) -> Self {
        let breaker = factory.get_or_create(&self.name, self.circuit_breaker_config);
        self.circuit_breaker_override = Some(breaker);
        self
    }

    pub fn build(self) -> Result<ResilientCall<E>, BuildError> {
        let retrier = Retrier::from_config(self.name.clone(), self.retry_config)?;
        let circuit_breaker = self
            .circuit_breaker_override
            .unwrap_or_else(|| CircuitBreaker::new(self.name.clone(), self.circuit_breaker_config));
        Ok(ResilientCall {
            bulkhead: Bulkhead::from_config(self.name.clone(), self.bulkhead_config),
            circuit_breaker,
            retrier: Arc::new(retrier),
            timeout: TimeoutPolicy::new(self.name.clone(), self.timeout_duration)
                .expect("timeout duration from validated config is always in range"),
            name: self.name,
        })
    }
}
