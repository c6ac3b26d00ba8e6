//! Queue configuration and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::job::DEFAULT_MAX_ATTEMPTS;

/// Configuration for the queue manager and its durable tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs processed at once by the durable tier.
    pub concurrency: usize,
    /// Interval between dispatcher polls (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum number of jobs claimed per poll.
    pub batch_size: usize,
    /// Delay before the first retry (milliseconds).
    pub base_retry_delay_ms: u64,
    /// Growth factor applied per additional retry.
    pub retry_backoff_multiplier: f64,
    /// Upper bound for any retry delay (milliseconds).
    pub max_retry_delay_ms: u64,
    /// Whether retry delays are randomised. Handlers may override this.
    pub jitter: bool,
    /// Attempt ceiling for jobs added without `max_attempts`.
    pub default_max_attempts: u32,
    /// Retention window for completed and cancelled jobs.
    pub cleanup_after_days: u32,
    /// Interval between cleanup sweeps (milliseconds).
    pub cleanup_interval_ms: u64,
    /// How long `stop()` waits for in-flight jobs (milliseconds).
    pub shutdown_timeout_ms: u64,
    /// Per-invocation handler timeout (milliseconds). `None` disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_ms: Option<u64>,
    /// Tier used when `JobOptions::durable` is not set.
    pub default_durable: bool,
    /// Settings for the in-memory tier.
    pub fast: FastTierConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval_ms: 1_000,
            batch_size: 10,
            base_retry_delay_ms: 1_000,
            retry_backoff_multiplier: 2.0,
            max_retry_delay_ms: 300_000,
            jitter: true,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            cleanup_after_days: 7,
            cleanup_interval_ms: 3_600_000,
            shutdown_timeout_ms: 30_000,
            job_timeout_ms: Some(300_000),
            default_durable: true,
            fast: FastTierConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    /// Backoff policy shared by both tiers.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
            multiplier: self.retry_backoff_multiplier,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            jitter: self.jitter,
        }
    }

    /// Check the configuration for values the dispatcher cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::Invalid("cleanup_interval_ms must be positive".into()));
        }
        if !(self.retry_backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry_backoff_multiplier must be at least 1".into(),
            ));
        }
        if self.max_retry_delay_ms < self.base_retry_delay_ms {
            return Err(ConfigError::Invalid(
                "max_retry_delay_ms must not be below base_retry_delay_ms".into(),
            ));
        }
        self.fast.validate()
    }
}

/// Configuration for the fast in-memory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastTierConfig {
    /// Maximum number of jobs processed at once.
    pub concurrency: usize,
    /// Interval between dispatcher polls (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum number of jobs claimed per poll.
    pub batch_size: usize,
    /// Rate limit: minimum time between two dispatches (milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_dispatch_interval_ms: Option<u64>,
    /// Batching: group up to this many jobs of one type into a single
    /// handler invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_batch_size: Option<usize>,
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval_ms: 50,
            batch_size: 50,
            min_dispatch_interval_ms: None,
            handler_batch_size: None,
        }
    }
}

impl FastTierConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_dispatch_interval(&self) -> Option<Duration> {
        self.min_dispatch_interval_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.batch_size == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "fast tier concurrency, batch_size and poll_interval_ms must be positive".into(),
            ));
        }
        if self.handler_batch_size == Some(0) {
            return Err(ConfigError::Invalid(
                "fast tier handler_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
}

impl QueueStats {
    /// Jobs not yet finished (pending + processing).
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }

    /// Combine counts from two tiers.
    pub fn merge(self, other: QueueStats) -> QueueStats {
        QueueStats {
            pending: self.pending + other.pending,
            processing: self.processing + other.processing,
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
            cancelled: self.cancelled + other.cancelled,
            total: self.total + other.total,
        }
    }

    /// Add `count` jobs of the given status.
    pub fn record(&mut self, status: crate::JobStatus, count: u64) {
        use crate::JobStatus;

        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;

    #[test]
    fn defaults_match_documented_values() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.backoff().base_delay, Duration::from_secs(1));
        assert_eq!(config.backoff().max_delay, Duration::from_secs(300));
        assert_eq!(config.cleanup_after_days, 7);
        assert!(config.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"concurrency": 2, "fast": {"concurrency": 1}}"#)
                .expect("valid config json");
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.fast.concurrency, 1);
        assert_eq!(config.fast.batch_size, 50);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let zero = QueueConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let shrinking = QueueConfig {
            retry_backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let mut fast = QueueConfig::default();
        fast.fast.handler_batch_size = Some(0);
        assert!(fast.validate().is_err());

        let no_sweep_interval = QueueConfig {
            cleanup_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            no_sweep_interval.validate(),
            Err(ConfigError::Invalid("cleanup_interval_ms must be positive".into()))
        );
    }

    #[test]
    fn stats_record_and_merge() {
        let mut durable = QueueStats::default();
        durable.record(JobStatus::Completed, 3);
        durable.record(JobStatus::Failed, 1);

        let mut fast = QueueStats::default();
        fast.record(JobStatus::Pending, 2);

        let merged = durable.merge(fast);
        assert_eq!(merged.total, 6);
        assert_eq!(merged.active(), 2);
        assert_eq!(merged.processed(), 4);
        assert_eq!(merged.success_rate(), Some(75.0));
    }
}
