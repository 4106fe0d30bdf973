//! Runtime configuration for the dispatcher.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Durations are stored in milliseconds; use the accessor methods to get
//! [`Duration`] values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::ActivityOptions;
use crate::matching::DEFAULT_MAX_BATCH;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub matching: MatchingConfig,
    pub lifecycle: LifecycleConfig,
    /// Retry policy for activities that do not carry their own.
    pub retry: RetryPolicy,
    pub ride: RideConfig,
}

impl DispatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matching.period_ms == 0 {
            return Err(ConfigError::invalid("matching.period_ms", "must be positive"));
        }
        if self.matching.max_batch == 0 {
            return Err(ConfigError::invalid("matching.max_batch", "must be positive"));
        }
        self.retry.validate("retry")?;
        for (field, activity) in [
            ("lifecycle.ride", &self.lifecycle.ride),
            ("lifecycle.finalize", &self.lifecycle.finalize),
        ] {
            if activity.start_to_close_ms == 0 {
                return Err(ConfigError::invalid(field, "start_to_close_ms must be positive"));
            }
            if let Some(retry) = &activity.retry {
                retry.validate(field)?;
            }
        }
        if self.lifecycle.rating.start_to_close_ms == 0 {
            return Err(ConfigError::invalid(
                "lifecycle.rating",
                "start_to_close_ms must be positive",
            ));
        }
        if self.ride.min_duration_ms > self.ride.max_duration_ms {
            return Err(ConfigError::invalid(
                "ride",
                "min_duration_ms exceeds max_duration_ms",
            ));
        }
        // Samples stay below max_duration_ms, so a max equal to the timeout is fine.
        let ride_timeout = self.lifecycle.ride.start_to_close_ms;
        if self.ride.max_duration_ms > ride_timeout || self.ride.min_duration_ms >= ride_timeout {
            return Err(ConfigError::invalid(
                "ride",
                format!("simulated rides must finish within the ride timeout ({ride_timeout} ms)"),
            ));
        }
        if self.ride.heartbeat_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "ride.heartbeat_interval_ms",
                "must be positive",
            ));
        }
        if let Some(timeout) = self.lifecycle.ride.heartbeat_timeout_ms {
            if self.ride.heartbeat_interval_ms >= timeout {
                return Err(ConfigError::invalid(
                    "ride.heartbeat_interval_ms",
                    format!("must be shorter than the ride heartbeat timeout ({timeout} ms)"),
                ));
            }
        }
        Ok(())
    }

    pub fn ride_options(&self) -> ActivityOptions {
        self.lifecycle.ride.options(&self.retry)
    }

    pub fn finalize_options(&self) -> ActivityOptions {
        self.lifecycle.finalize.options(&self.retry)
    }

    /// Rating collection is bounded only by its start-to-close timeout and is not retried.
    pub fn rating_options(&self) -> ActivityOptions {
        ActivityOptions {
            start_to_close: self.lifecycle.rating.start_to_close(),
            heartbeat_timeout: None,
            retry: RetryPolicy::no_retry(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub period_ms: u64,
    pub max_batch: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            period_ms: 30_000,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl MatchingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub ride: ActivityConfig,
    pub rating: RatingConfig,
    pub finalize: ActivityConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ride: ActivityConfig {
                start_to_close_ms: 60_000,
                heartbeat_timeout_ms: Some(60_000),
                retry: None,
            },
            rating: RatingConfig::default(),
            finalize: ActivityConfig {
                start_to_close_ms: 10_000,
                heartbeat_timeout_ms: None,
                retry: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    pub start_to_close_ms: u64,
    #[serde(default)]
    pub heartbeat_timeout_ms: Option<u64>,
    /// Overrides the top-level retry policy.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl ActivityConfig {
    pub fn start_to_close(&self) -> Duration {
        Duration::from_millis(self.start_to_close_ms)
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_ms.map(Duration::from_millis)
    }

    fn options(&self, fallback: &RetryPolicy) -> ActivityOptions {
        ActivityOptions {
            start_to_close: self.start_to_close(),
            heartbeat_timeout: self.heartbeat_timeout(),
            retry: self.retry.clone().unwrap_or_else(|| fallback.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub start_to_close_ms: u64,
    /// How long collection waits for a score before giving up without one.
    pub window_ms: u64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            start_to_close_ms: 30_000,
            window_ms: 15_000,
        }
    }
}

impl RatingConfig {
    pub fn start_to_close(&self) -> Duration {
        Duration::from_millis(self.start_to_close_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Exponential backoff for transient activity failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            max_interval_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is the 1-based attempt that just failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max = Duration::from_millis(self.max_interval_ms);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = Duration::from_millis(self.initial_interval_ms).as_secs_f64()
            * self.backoff_coefficient.powi(exponent);
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(secs)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(field, "retry.max_attempts must be at least 1"));
        }
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            return Err(ConfigError::invalid(
                field,
                "retry.backoff_coefficient must be at least 1.0",
            ));
        }
        if self.initial_interval_ms > self.max_interval_ms {
            return Err(ConfigError::invalid(
                field,
                "retry.initial_interval_ms exceeds retry.max_interval_ms",
            ));
        }
        Ok(())
    }
}

/// Simulated ride used by the in-process trip actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RideConfig {
    /// Inclusive lower bound of a sampled ride.
    pub min_duration_ms: u64,
    /// Exclusive upper bound of a sampled ride.
    pub max_duration_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 0,
            max_duration_ms: 60_000,
            heartbeat_interval_ms: 5_000,
        }
    }
}

impl RideConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = DispatchConfig::from_json_str("{}").expect("defaults are valid");
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.matching.period(), Duration::from_secs(30));
        assert_eq!(config.matching.max_batch, 10);
        assert_eq!(config.lifecycle.rating.window(), Duration::from_secs(15));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = DispatchConfig::from_json_str(
            r#"{"matching": {"period_ms": 500}, "retry": {"max_attempts": 5}}"#,
        )
        .expect("valid");
        assert_eq!(config.matching.period_ms, 500);
        assert_eq!(config.matching.max_batch, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_interval_ms, 1_000);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_secs(1));
        assert_eq!(retry.backoff(2), Duration::from_secs(2));
        assert_eq!(retry.backoff(3), Duration::from_secs(4));
        assert_eq!(retry.backoff(10), Duration::from_secs(30));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn activity_options_fall_back_to_top_level_retry() {
        let config = DispatchConfig::default();
        let ride = config.ride_options();
        assert_eq!(ride.start_to_close, Duration::from_secs(60));
        assert_eq!(ride.heartbeat_timeout, Some(Duration::from_secs(60)));
        assert_eq!(ride.retry, config.retry);

        let rating = config.rating_options();
        assert_eq!(rating.heartbeat_timeout, None);
        assert_eq!(rating.retry.max_attempts, 1);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let zero_period = r#"{"matching": {"period_ms": 0}}"#;
        assert!(matches!(
            DispatchConfig::from_json_str(zero_period),
            Err(ConfigError::Invalid { field: "matching.period_ms", .. })
        ));

        let zero_attempts = r#"{"retry": {"max_attempts": 0}}"#;
        assert!(DispatchConfig::from_json_str(zero_attempts).is_err());

        let shrinking = r#"{"retry": {"backoff_coefficient": 0.5}}"#;
        assert!(DispatchConfig::from_json_str(shrinking).is_err());

        let slow_heartbeat = r#"{"ride": {"heartbeat_interval_ms": 60000}}"#;
        assert!(matches!(
            DispatchConfig::from_json_str(slow_heartbeat),
            Err(ConfigError::Invalid { field: "ride.heartbeat_interval_ms", .. })
        ));
    }

    #[test]
    fn rides_must_fit_the_ride_timeout() {
        let longer = r#"{"ride": {"max_duration_ms": 60001}}"#;
        assert!(matches!(
            DispatchConfig::from_json_str(longer),
            Err(ConfigError::Invalid { field: "ride", .. })
        ));

        let fixed_at_timeout = r#"{"ride": {"min_duration_ms": 60000}}"#;
        assert!(DispatchConfig::from_json_str(fixed_at_timeout).is_err());

        let shorter_timeout = r#"{"lifecycle": {"ride": {"start_to_close_ms": 20000}}, "ride": {"max_duration_ms": 20000}}"#;
        assert!(DispatchConfig::from_json_str(shorter_timeout).is_ok());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            DispatchConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
