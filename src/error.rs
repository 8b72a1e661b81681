//! Error types for resilience policies.

use std::fmt;
use std::time::Duration;

/// Cap the number of stored failures inside `MaxRetriesExceeded` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Stable, externally-visible error codes. These strings are part of the crate's
/// ABI (alerting rules, HTTP problem-detail bodies) and must not change without
/// a migration.
pub const CODE_CIRCUIT_OPEN: &str = "RES-001";
pub const CODE_BULKHEAD_FULL: &str = "RES-002";
pub const CODE_TIMEOUT_EXCEEDED: &str = "RES-003";
pub const CODE_MAX_RETRIES_EXCEEDED: &str = "RES-004";

/// Unified error type for all resilience policies.
///
/// Generic over the caller's own error type `E` so that user errors pass
/// through unchanged instead of being boxed. Two errors compare equal under
/// [`PartialEq`] iff their [`code`](ResilienceError::code) matches — payload
/// differences (durations, failure history) are not significant for identity
/// comparisons, only for diagnostics.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The circuit breaker rejected the call (Open, or an over-limit HalfOpen probe).
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// The bulkhead rejected the call at capacity (active and waiting both full).
    BulkheadFull { in_flight: usize, max: usize },
    /// The operation exceeded its per-attempt timeout.
    TimeoutExceeded { elapsed: Duration, timeout: Duration },
    /// All retry attempts were exhausted.
    MaxRetriesExceeded { attempts: usize, failures: Vec<E> },
    /// The caller's cancellation token fired. Never re-tagged as one of the
    /// codes above, at any layer.
    Cancelled,
    /// The underlying operation failed; returned unchanged.
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::BulkheadFull { in_flight, max } => {
                Self::BulkheadFull { in_flight: *in_flight, max: *max }
            }
            Self::TimeoutExceeded { elapsed, timeout } => {
                Self::TimeoutExceeded { elapsed: *elapsed, timeout: *timeout }
            }
            Self::MaxRetriesExceeded { attempts, failures } => {
                Self::MaxRetriesExceeded { attempts: *attempts, failures: failures.clone() }
            }
            Self::Cancelled => Self::Cancelled,
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

/// Equality is by `code()` only (per the data model's identity-by-code rule),
/// with `Cancelled`/`Inner` compared by variant tag since they carry no code.
impl<E> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self.code(), other.code()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => matches!(
                (self, other),
                (Self::Cancelled, Self::Cancelled) | (Self::Inner(_), Self::Inner(_))
            ),
            _ => false,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(
                    f,
                    "{}: circuit breaker open ({} failures, open for {:?})",
                    CODE_CIRCUIT_OPEN, failure_count, open_duration
                )
            }
            Self::BulkheadFull { in_flight, max } => {
                write!(
                    f,
                    "{}: bulkhead rejected request ({} in-flight, max {})",
                    CODE_BULKHEAD_FULL, in_flight, max
                )
            }
            Self::TimeoutExceeded { elapsed, timeout } => {
                write!(
                    f,
                    "{}: operation timed out after {:?} (limit: {:?})",
                    CODE_TIMEOUT_EXCEEDED, elapsed, timeout
                )
            }
            Self::MaxRetriesExceeded { attempts, failures } => {
                let last = failures.last().map(|e| e.to_string()).unwrap_or_default();
                write!(
                    f,
                    "{}: retry exhausted after {} attempts ({} failures), last error: {}",
                    CODE_MAX_RETRIES_EXCEEDED,
                    attempts,
                    failures.len(),
                    last
                )
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::MaxRetriesExceeded { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// The stable `RES-00x` code for this error, or `None` for `Cancelled`/`Inner`,
    /// which are not part of the RES-00x ABI.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::CircuitOpen { .. } => Some(CODE_CIRCUIT_OPEN),
            Self::BulkheadFull { .. } => Some(CODE_BULKHEAD_FULL),
            Self::TimeoutExceeded { .. } => Some(CODE_TIMEOUT_EXCEEDED),
            Self::MaxRetriesExceeded { .. } => Some(CODE_MAX_RETRIES_EXCEEDED),
            Self::Cancelled | Self::Inner(_) => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_bulkhead_full(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. })
    }

    pub fn is_timeout_exceeded(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }

    pub fn is_max_retries_exceeded(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// `none|circuit_open|bulkhead_full|timeout|max_retries|unknown` — used as
    /// the `error.type` attribute on tracing spans and log records.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::BulkheadFull { .. } => "bulkhead_full",
            Self::TimeoutExceeded { .. } => "timeout",
            Self::MaxRetriesExceeded { .. } => "max_retries",
            Self::Cancelled => "cancelled",
            Self::Inner(_) => "unknown",
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::MaxRetriesExceeded { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }
}
