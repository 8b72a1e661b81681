//! Typed configuration for each primitive, validated at construction time.
//!
//! Each config exposes a [`validate`](CircuitBreakerConfig::validate)-style
//! method returning a [`ConfigError`] naming the offending field; callers are
//! expected to treat a validation failure as fatal at process startup.

use std::fmt;
use std::time::Duration;

/// A config field failed validation. Carries the field name and a reason so
/// the failure is observable (logs, startup panics) rather than silently
/// clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config field `{}`: {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// `{MaxRequests>=1, Interval>0, Timeout>0, FailureThreshold>=1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub max_requests: usize,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            failure_threshold: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests < 1 {
            return Err(ConfigError::new("max_requests", "must be >= 1"));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::new("interval", "must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::new("timeout", "must be > 0"));
        }
        if self.failure_threshold < 1 {
            return Err(ConfigError::new("failure_threshold", "must be >= 1"));
        }
        Ok(())
    }
}

/// `{MaxAttempts>=1, InitialDelay>0, MaxDelay>=InitialDelay, Multiplier>=1.0}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::new("max_attempts", "must be >= 1"));
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::new("initial_delay", "must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::new("max_delay", "must be >= initial_delay"));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::new("multiplier", "must be >= 1.0"));
        }
        Ok(())
    }
}

/// `{Default>0, Database>0, ExternalAPI>0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub default: Duration,
    pub database: Duration,
    pub external_api: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            database: Duration::from_secs(5),
            external_api: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default.is_zero() {
            return Err(ConfigError::new("default", "must be > 0"));
        }
        if self.database.is_zero() {
            return Err(ConfigError::new("database", "must be > 0"));
        }
        if self.external_api.is_zero() {
            return Err(ConfigError::new("external_api", "must be > 0"));
        }
        Ok(())
    }
}

/// `{MaxConcurrent>=1, MaxWaiting>=0}`. `max_waiting: 0` means strict
/// reject-when-full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    pub max_waiting: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_waiting: 100 }
    }
}

impl BulkheadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent < 1 {
            return Err(ConfigError::new("max_concurrent", "must be >= 1"));
        }
        Ok(())
    }
}

/// `{DrainPeriod>0, GracePeriod>=0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownConfig {
    pub drain_period: Duration,
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_period: Duration::from_secs(30), grace_period: Duration::from_secs(5) }
    }
}

impl ShutdownConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drain_period.is_zero() {
            return Err(ConfigError::new("drain_period", "must be > 0"));
        }
        Ok(())
    }
}

/// Composes all five sub-configs and validates each in turn, short-circuiting
/// on the first failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub bulkhead: BulkheadConfig,
    pub shutdown: ShutdownConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            timeout: TimeoutConfig::default(),
            bulkhead: BulkheadConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.timeout.validate()?;
        self.bulkhead.validate()?;
        self.shutdown.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ResilienceConfig::default().validate().is_ok());
    }

    #[test]
    fn circuit_breaker_rejects_zero_failure_threshold() {
        let cfg = CircuitBreakerConfig { failure_threshold: 0, ..CircuitBreakerConfig::default() };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field, "failure_threshold");
    }

    #[test]
    fn retry_rejects_max_delay_below_initial_delay() {
        let cfg = RetryConfig {
            max_delay: Duration::from_millis(10),
            initial_delay: Duration::from_millis(100),
            ..RetryConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field, "max_delay");
    }

    #[test]
    fn retry_rejects_multiplier_below_one() {
        let cfg = RetryConfig { multiplier: 0.5, ..RetryConfig::default() };
        assert_eq!(cfg.validate().unwrap_err().field, "multiplier");
    }

    #[test]
    fn bulkhead_allows_zero_waiting() {
        let cfg = BulkheadConfig { max_concurrent: 1, max_waiting: 0 };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bulkhead_rejects_zero_concurrent() {
        let cfg = BulkheadConfig { max_concurrent: 0, max_waiting: 0 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shutdown_rejects_zero_drain_period() {
        let cfg = ShutdownConfig { drain_period: Duration::from_secs(0), grace_period: Duration::from_secs(0) };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resilience_config_short_circuits_on_first_bad_subconfig() {
        let mut cfg = ResilienceConfig::default();
        cfg.timeout.database = Duration::from_secs(0);
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field, "database");
    }
}
