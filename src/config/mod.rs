use crate::binlog::{DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_INTERVAL};
use crate::core::{DbError, Result};
use crate::store::{DEFAULT_OPEN_ATTEMPTS, DEFAULT_OPEN_INTERVAL};
use crate::util::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for a domain and the sessions it creates
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Policy for opening the storage backend
    pub store_retry: RetryPolicy,

    /// Policy for dialing the binlog pump
    pub pump_retry: RetryPolicy,

    /// Longest pause between two timestamp prefetches
    pub tso_refresh_interval: Duration,

    /// Bound on a direct timestamp fetch at transaction start
    pub tso_fetch_timeout: Duration,

    /// Consecutive fetch failures after which a worker reports itself degraded
    pub tso_failure_threshold: u32,

    /// How long closing a session waits for its worker before aborting it
    pub worker_stop_timeout: Duration,

    /// Maximum idle sessions kept by the system session pool
    pub sys_pool_capacity: usize,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            store_retry: RetryPolicy::linear(DEFAULT_OPEN_ATTEMPTS, DEFAULT_OPEN_INTERVAL),
            pump_retry: RetryPolicy::linear(DEFAULT_DIAL_ATTEMPTS, DEFAULT_DIAL_INTERVAL),
            tso_refresh_interval: Duration::from_millis(50),
            tso_fetch_timeout: Duration::from_secs(1),
            tso_failure_threshold: 3,
            worker_stop_timeout: Duration::from_millis(500),
            sys_pool_capacity: 200,
        }
    }

    pub fn store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    pub fn pump_retry(mut self, policy: RetryPolicy) -> Self {
        self.pump_retry = policy;
        self
    }

    pub fn tso_refresh_interval(mut self, interval: Duration) -> Self {
        self.tso_refresh_interval = interval;
        self
    }

    pub fn tso_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.tso_fetch_timeout = timeout;
        self
    }

    pub fn tso_failure_threshold(mut self, threshold: u32) -> Self {
        self.tso_failure_threshold = threshold;
        self
    }

    pub fn worker_stop_timeout(mut self, timeout: Duration) -> Self {
        self.worker_stop_timeout = timeout;
        self
    }

    pub fn sys_pool_capacity(mut self, capacity: usize) -> Self {
        self.sys_pool_capacity = capacity;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.store_retry.validate()?;
        self.pump_retry.validate()?;

        if self.tso_refresh_interval.is_zero() {
            return Err(DbError::ExecutionError("tso_refresh_interval must be > 0".into()));
        }
        if self.tso_fetch_timeout.is_zero() {
            return Err(DbError::ExecutionError("tso_fetch_timeout must be > 0".into()));
        }
        if self.tso_failure_threshold == 0 {
            return Err(DbError::ExecutionError("tso_failure_threshold must be > 0".into()));
        }
        if self.worker_stop_timeout.is_zero() {
            return Err(DbError::ExecutionError("worker_stop_timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Parses a JSON document; absent keys keep their defaults
    ///
    /// ```ignore
    /// let config = SessionConfig::from_json(r#"{
    ///     "store_retry": { "attempts": 5, "interval_ms": 200, "backoff": "constant" },
    ///     "tso_refresh_interval_ms": 20
    /// }"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile =
            serde_json::from_str(json).map_err(|e| DbError::ParseError(format!("invalid config: {}", e)))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RetryFile {
    attempts: u32,
    interval_ms: u64,
    #[serde(default = "default_backoff")]
    backoff: Backoff,
}

fn default_backoff() -> Backoff {
    Backoff::Linear
}

impl RetryFile {
    fn into_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.attempts,
            interval: Duration::from_millis(self.interval_ms),
            backoff: self.backoff,
        }
    }
}

/// On-disk layout, durations in milliseconds
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    store_retry: Option<RetryFile>,
    pump_retry: Option<RetryFile>,
    tso_refresh_interval_ms: Option<u64>,
    tso_fetch_timeout_ms: Option<u64>,
    tso_failure_threshold: Option<u32>,
    worker_stop_timeout_ms: Option<u64>,
    sys_pool_capacity: Option<usize>,
}

impl ConfigFile {
    fn into_config(self) -> SessionConfig {
        let mut config = SessionConfig::new();
        if let Some(policy) = self.store_retry {
            config.store_retry = policy.into_policy();
        }
        if let Some(policy) = self.pump_retry {
            config.pump_retry = policy.into_policy();
        }
        if let Some(ms) = self.tso_refresh_interval_ms {
            config.tso_refresh_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.tso_fetch_timeout_ms {
            config.tso_fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.tso_failure_threshold {
            config.tso_failure_threshold = threshold;
        }
        if let Some(ms) = self.worker_stop_timeout_ms {
            config.worker_stop_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.sys_pool_capacity {
            config.sys_pool_capacity = capacity;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.store_retry, RetryPolicy::linear(3, Duration::from_millis(500)));
        assert_eq!(config.pump_retry, RetryPolicy::linear(3, Duration::from_millis(10)));
        assert_eq!(config.sys_pool_capacity, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SessionConfig::new()
            .tso_refresh_interval(Duration::from_millis(5))
            .tso_failure_threshold(1)
            .sys_pool_capacity(4);

        assert_eq!(config.tso_refresh_interval, Duration::from_millis(5));
        assert_eq!(config.tso_failure_threshold, 1);
        assert_eq!(config.sys_pool_capacity, 4);
    }

    #[test]
    fn test_validate() {
        assert!(SessionConfig::new().tso_failure_threshold(0).validate().is_err());
        assert!(SessionConfig::new()
            .store_retry(RetryPolicy::constant(0, Duration::ZERO))
            .validate()
            .is_err());
        assert!(SessionConfig::new()
            .worker_stop_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_json() {
        let config = SessionConfig::from_json(
            r#"{
                "store_retry": { "attempts": 5, "interval_ms": 200, "backoff": "constant" },
                "pump_retry": { "attempts": 2, "interval_ms": 1 },
                "tso_refresh_interval_ms": 20,
                "sys_pool_capacity": 8
            }"#,
        )
        .unwrap();

        assert_eq!(config.store_retry, RetryPolicy::constant(5, Duration::from_millis(200)));
        assert_eq!(config.pump_retry, RetryPolicy::linear(2, Duration::from_millis(1)));
        assert_eq!(config.tso_refresh_interval, Duration::from_millis(20));
        assert_eq!(config.sys_pool_capacity, 8);
        assert_eq!(config.tso_failure_threshold, 3);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(SessionConfig::from_json("{").is_err());
        assert!(SessionConfig::from_json(r#"{ "unknown_key": 1 }"#).is_err());
        assert!(SessionConfig::from_json(r#"{ "tso_failure_threshold": 0 }"#).is_err());
    }
}
