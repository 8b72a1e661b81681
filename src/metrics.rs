//! Metrics sinks: one collector group per primitive, plus a no-op variant.
//!
//! Metric names and label sets are part of this crate's external ABI (§6):
//! they are consumed by alerting rules and must not change without a
//! migration, so every collector below is named for the literal spec table
//! (no component-name prefix). That bareness means the circuit breaker's and
//! the timeout policy's `operation_duration_seconds{name,result}` collide if
//! registered into the same [`Registry`] — give each primitive its own
//! registry (or its own `MetricsRegistry`) rather than sharing one process
//! registry across components, the same way a process exposing both under
//! `/metrics` would namespace them by exporter rather than by renaming.
//!
//! Registration is idempotent — constructing the same metrics group twice
//! against one [`MetricsRegistry`] (e.g. two call sites building their own
//! sink against a shared registry) returns clones of the same underlying
//! collector, rather than propagating [`prometheus::Error::AlreadyReg`] as a
//! hard failure or, worse, handing the second caller an orphaned collector
//! whose observations never reach `gather()`.

use prometheus::{Counter, Gauge, GaugeVec, HistogramVec, IntCounterVec, Opts, Registry};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Wraps a [`Registry`] with a name-keyed cache of already-built collectors,
/// so that registering the same metric name twice returns the registry's one
/// held collector rather than a second, unregistered copy.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    cache: Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self { registry: Arc::new(Registry::new()), cache: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn with_registry<R: Into<Arc<Registry>>>(registry: R) -> Self {
        Self { registry: registry.into(), cache: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Registers `collector` under `name` the first time it's requested;
/// subsequent calls for the same `name` return a clone of that same
/// collector instead of attempting (and discarding) a fresh registration.
fn registered<T: Clone + prometheus::core::Collector + Send + Sync + 'static>(
    metrics: &MetricsRegistry,
    name: &str,
    build: impl FnOnce() -> Result<T, prometheus::Error>,
) -> Result<T, prometheus::Error> {
    let mut cache = metrics.cache.lock().unwrap();
    if let Some(existing) = cache.get(name) {
        return Ok(existing
            .clone()
            .downcast::<T>()
            .expect("metric name reused with a different collector type")
            .as_ref()
            .clone());
    }

    let collector = build()?;
    match metrics.registry.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => {
            cache.insert(name.to_string(), Arc::new(collector.clone()));
            Ok(collector)
        }
        Err(e) => Err(e),
    }
}

/// `state{name,state}` gauge (one-hot), `transitions_total{name,from,to}`
/// counter, `operation_duration_seconds{name,result}` histogram.
#[derive(Clone)]
pub struct CircuitBreakerMetrics {
    pub state: GaugeVec,
    pub transitions_total: IntCounterVec,
    pub operation_duration_seconds: HistogramVec,
}

impl CircuitBreakerMetrics {
    pub fn new(metrics: &MetricsRegistry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            state: registered(metrics, "state", || {
                GaugeVec::new(
                    Opts::new("state", "Current circuit breaker state, one-hot"),
                    &["name", "state"],
                )
            })?,
            transitions_total: registered(metrics, "transitions_total", || {
                IntCounterVec::new(
                    Opts::new("transitions_total", "Circuit breaker state transitions"),
                    &["name", "from", "to"],
                )
            })?,
            operation_duration_seconds: registered(metrics, "operation_duration_seconds", || {
                HistogramVec::new(
                    prometheus::HistogramOpts::new(
                        "operation_duration_seconds",
                        "Duration of operations behind a circuit breaker",
                    ),
                    &["name", "result"],
                )
            })?,
        })
    }

    pub fn noop() -> Self {
        Self {
            state: GaugeVec::new(Opts::new("state", "noop"), &["name", "state"]).unwrap(),
            transitions_total: IntCounterVec::new(Opts::new("transitions_total", "noop"), &["name", "from", "to"])
                .unwrap(),
            operation_duration_seconds: HistogramVec::new(
                prometheus::HistogramOpts::new("operation_duration_seconds", "noop"),
                &["name", "result"],
            )
            .unwrap(),
        }
    }
}

/// `operations_total{name,outcome}`, `attempts_total{name,attempt}` counters,
/// `duration_seconds{name,outcome}` histogram.
#[derive(Clone)]
pub struct RetryMetrics {
    pub operations_total: IntCounterVec,
    pub attempts_total: IntCounterVec,
    pub duration_seconds: HistogramVec,
}

impl RetryMetrics {
    pub fn new(metrics: &MetricsRegistry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            operations_total: registered(metrics, "operations_total", || {
                IntCounterVec::new(
                    Opts::new("operations_total", "Outcomes of retried operations"),
                    &["name", "outcome"],
                )
            })?,
            attempts_total: registered(metrics, "attempts_total", || {
                IntCounterVec::new(Opts::new("attempts_total", "Attempts made by the retrier"), &["name", "attempt"])
            })?,
            duration_seconds: registered(metrics, "duration_seconds", || {
                HistogramVec::new(
                    prometheus::HistogramOpts::new("duration_seconds", "Total time spent retrying"),
                    &["name", "outcome"],
                )
            })?,
        })
    }

    pub fn noop() -> Self {
        Self {
            operations_total: IntCounterVec::new(Opts::new("operations_total", "noop"), &["name", "outcome"])
                .unwrap(),
            attempts_total: IntCounterVec::new(Opts::new("attempts_total", "noop"), &["name", "attempt"]).unwrap(),
            duration_seconds: HistogramVec::new(
                prometheus::HistogramOpts::new("duration_seconds", "noop"),
                &["name", "outcome"],
            )
            .unwrap(),
        }
    }
}

/// `operation_duration_seconds{name,result}` histogram.
#[derive(Clone)]
pub struct TimeoutMetrics {
    pub operation_duration_seconds: HistogramVec,
}

impl TimeoutMetrics {
    /// Named identically to [`CircuitBreakerMetrics::operation_duration_seconds`]
    /// per the spec's literal ABI table — give each primitive its own
    /// [`MetricsRegistry`] rather than sharing one across both.
    pub fn new(metrics: &MetricsRegistry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            operation_duration_seconds: registered(metrics, "operation_duration_seconds", || {
                HistogramVec::new(
                    prometheus::HistogramOpts::new(
                        "operation_duration_seconds",
                        "Duration of operations behind a per-attempt timeout",
                    ),
                    &["name", "result"],
                )
            })?,
        })
    }

    pub fn noop() -> Self {
        Self {
            operation_duration_seconds: HistogramVec::new(
                prometheus::HistogramOpts::new("operation_duration_seconds", "noop"),
                &["name", "result"],
            )
            .unwrap(),
        }
    }
}

/// `active{name}`, `waiting{name}` gauges, `operations_total{name,result}`
/// counter, `wait_duration_seconds{name}` histogram.
#[derive(Clone)]
pub struct BulkheadMetrics {
    pub active: GaugeVec,
    pub waiting: GaugeVec,
    pub operations_total: IntCounterVec,
    pub wait_duration_seconds: HistogramVec,
}

impl BulkheadMetrics {
    pub fn new(metrics: &MetricsRegistry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            active: registered(metrics, "active", || {
                GaugeVec::new(Opts::new("active", "In-flight calls holding a bulkhead slot"), &["name"])
            })?,
            waiting: registered(metrics, "waiting", || {
                GaugeVec::new(Opts::new("waiting", "Calls waiting for a bulkhead slot"), &["name"])
            })?,
            operations_total: registered(metrics, "operations_total", || {
                IntCounterVec::new(Opts::new("operations_total", "Bulkhead admission outcomes"), &["name", "result"])
            })?,
            wait_duration_seconds: registered(metrics, "wait_duration_seconds", || {
                HistogramVec::new(
                    prometheus::HistogramOpts::new(
                        "wait_duration_seconds",
                        "Time spent waiting for a bulkhead slot",
                    ),
                    &["name"],
                )
            })?,
        })
    }

    pub fn noop() -> Self {
        Self {
            active: GaugeVec::new(Opts::new("active", "noop"), &["name"]).unwrap(),
            waiting: GaugeVec::new(Opts::new("waiting", "noop"), &["name"]).unwrap(),
            operations_total: IntCounterVec::new(Opts::new("operations_total", "noop"), &["name", "result"])
                .unwrap(),
            wait_duration_seconds: HistogramVec::new(
                prometheus::HistogramOpts::new("wait_duration_seconds", "noop"),
                &["name"],
            )
            .unwrap(),
        }
    }
}

/// `active_requests`, `shutdown_in_progress` gauges, `rejections_total`
/// counter, `shutdown_duration_seconds{result}` histogram.
#[derive(Clone)]
pub struct ShutdownMetrics {
    pub active_requests: Gauge,
    pub shutdown_in_progress: Gauge,
    pub rejections_total: Counter,
    pub shutdown_duration_seconds: HistogramVec,
}

impl ShutdownMetrics {
    pub fn new(metrics: &MetricsRegistry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            active_requests: registered(metrics, "active_requests", || {
                Gauge::new("active_requests", "Requests currently admitted")
            })?,
            shutdown_in_progress: registered(metrics, "shutdown_in_progress", || {
                Gauge::new("shutdown_in_progress", "1 once shutdown has been initiated")
            })?,
            rejections_total: registered(metrics, "rejections_total", || {
                Counter::new("rejections_total", "Requests rejected during shutdown")
            })?,
            shutdown_duration_seconds: registered(metrics, "shutdown_duration_seconds", || {
                HistogramVec::new(
                    prometheus::HistogramOpts::new("shutdown_duration_seconds", "Time spent draining on shutdown"),
                    &["result"],
                )
            })?,
        })
    }

    pub fn noop() -> Self {
        Self {
            active_requests: Gauge::new("active_requests", "noop").unwrap(),
            shutdown_in_progress: Gauge::new("shutdown_in_progress", "noop").unwrap(),
            rejections_total: Counter::new("rejections_total", "noop").unwrap(),
            shutdown_duration_seconds: HistogramVec::new(
                prometheus::HistogramOpts::new("shutdown_duration_seconds", "noop"),
                &["result"],
            )
            .unwrap(),
        }
    }
}
