//! Bulkhead: bounds concurrent in-flight operations, with a bounded queue of
//! callers willing to wait for a free slot.

use crate::config::BulkheadConfig;
use crate::metrics::BulkheadMetrics;
use crate::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bounds concurrent in-flight calls to `max_concurrent`. Callers beyond that
/// limit queue for a slot up to `max_waiting`; once the queue itself is full,
/// further callers are rejected immediately with
/// [`ResilienceError::BulkheadFull`].
#[derive(Clone)]
pub struct Bulkhead {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_waiting: usize,
    waiting: Arc<AtomicUsize>,
    metrics: Arc<BulkheadMetrics>,
}

impl Bulkhead {
    pub fn new(name: impl Into<Arc<str>>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_waiting: 0,
            waiting: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(BulkheadMetrics::noop()),
        }
    }

    pub fn from_config(name: impl Into<Arc<str>>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
            max_waiting: config.max_waiting,
            waiting: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(BulkheadMetrics::noop()),
        }
    }

    /// A bulkhead sized to the default outbound concurrency budget.
    pub fn default_preset(name: impl Into<Arc<str>>) -> Self {
        Self::from_config(name, BulkheadConfig::default())
    }

    pub fn for_database(name: impl Into<Arc<str>>) -> Self {
        Self::from_config(name, BulkheadConfig { max_concurrent: 20, max_waiting: 50 })
    }

    pub fn for_external_api(name: impl Into<Arc<str>>) -> Self {
        Self::from_config(name, BulkheadConfig { max_concurrent: 10, max_waiting: 20 })
    }

    pub fn unlimited(name: impl Into<Arc<str>>) -> Self {
        // Semaphore::MAX_PERMITS is approximately usize::MAX / 4; a large but
        // safe value stands in for "no practical limit".
        Self::new(name, 1_000_000_000)
    }

    pub fn with_metrics(mut self, metrics: Arc<BulkheadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Calls currently holding a slot and running their operation.
    pub fn active_count(&self) -> usize {
        self.in_flight()
    }

    /// Calls currently queued for a slot (admitted into the wait queue but
    /// not yet running).
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Runs `operation` once a slot is available. If the bulkhead is at
    /// capacity and the wait queue has room, blocks (cooperatively,
    /// cancellable via `token`) until a slot frees up or `max_waiting` is
    /// already occupied, in which case the call is rejected immediately.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        token: &CancellationToken,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if token.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let waiting = self.waiting.fetch_add(1, Ordering::AcqRel);
                // RAII so the waiting count is decremented on every exit path,
                // including the cancellation branch below and any early return.
                struct WaitGuard<'a>(&'a AtomicUsize);
                impl Drop for WaitGuard<'_> {
                    fn drop(&mut self) {
                        self.0.fetch_sub(1, Ordering::AcqRel);
                    }
                }
                let _guard = WaitGuard(&self.waiting);

                if waiting >= self.max_waiting {
                    let in_flight = self.in_flight();
                    self.metrics.operations_total.with_label_values(&[&self.name, "rejected"]).inc();
                    return Err(ResilienceError::BulkheadFull { in_flight, max: self.max_concurrent });
                }

                self.metrics.waiting.with_label_values(&[&self.name]).inc();
                let wait_start = Instant::now();

                let acquired = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = self.semaphore.clone().acquire_owned() => result.ok(),
                };

                self.metrics.waiting.with_label_values(&[&self.name]).dec();
                self.metrics
                    .wait_duration_seconds
                    .with_label_values(&[&self.name])
                    .observe(wait_start.elapsed().as_secs_f64());

                match acquired {
                    Some(permit) => permit,
                    None => return Err(ResilienceError::Cancelled),
                }
            }
        };

        self.metrics.active.with_label_values(&[&self.name]).inc();
        // RAII so the active gauge and the permit are released together even
        // if `operation` panics; the panic continues to unwind through here.
        struct ActiveGuard<'a> {
            gauge: &'a BulkheadMetrics,
            name: &'a str,
            _permit: tokio::sync::OwnedSemaphorePermit,
        }
        impl Drop for ActiveGuard<'_> {
            fn drop(&mut self) {
                self.gauge.active.with_label_values(&[self.name]).dec();
            }
        }
        let _guard = ActiveGuard { gauge: &self.metrics, name: &self.name, _permit: permit };

        let result = operation().await;

        match &result {
            Ok(_) => self.metrics.operations_total.with_label_values(&[&self.name, "success"]).inc(),
            Err(ResilienceError::Cancelled) => {
                self.metrics.operations_total.with_label_values(&[&self.name, "cancelled"]).inc()
            }
            Err(_) => self.metrics.operations_total.with_label_values(&[&self.name, "failure"]).inc(),
        }

        result
    }
}
