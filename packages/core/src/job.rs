//! Job domain types for work items in the queue.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Higher values are claimed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Self = Self(-10);
    pub const NORMAL: Self = Self(0);
    pub const HIGH: Self = Self(10);
    pub const CRITICAL: Self = Self(20);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its scheduled time and a free slot.
    #[default]
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Handler finished without error.
    Completed,
    /// Out of attempts, or no handler was registered for the job type.
    Failed,
    /// Cancelled by an explicit request.
    Cancelled,
}

impl JobStatus {
    /// Every status, in display order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Check if the job can be manually retried.
    pub fn can_retry(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }

    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Which queue implementation holds a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Persisted in the job store; survives restarts.
    Durable,
    /// Held in process memory only; lost on crash.
    Fast,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Durable => write!(f, "durable"),
            Tier::Fast => write!(f, "fast"),
        }
    }
}

/// Options accepted when adding a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    /// Delay before the job first becomes eligible. Ignored when
    /// `scheduled_at` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Route to the durable tier (`Some(true)`) or the fast in-memory tier
    /// (`Some(false)`). `None` uses the manager's configured default.
    ///
    /// Fast-tier jobs are never written to disk: anything queued but not yet
    /// processed is lost if the process crashes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Shorthand for `durable(false)`.
    pub fn fast(self) -> Self {
        self.durable(false)
    }
}

/// Default attempt ceiling when neither the caller nor the config sets one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Type of job (used for routing to handlers).
    pub job_type: String,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Execution priority.
    pub priority: Priority,
    /// Number of processing attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Attempt ceiling before permanent failure.
    pub max_attempts: u32,
    /// Last failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Earliest time the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job, eligible immediately.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            priority: Priority::default(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            error_message: None,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a job from caller options, falling back to `default_max_attempts`.
    pub fn from_options(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: &JobOptions,
        default_max_attempts: u32,
    ) -> Self {
        let mut job = Self::new(job_type, payload)
            .with_max_attempts(options.max_attempts.unwrap_or(default_max_attempts));

        if let Some(priority) = options.priority {
            job = job.with_priority(priority);
        }
        if let Some(at) = options.scheduled_at {
            job = job.with_scheduled_at(at);
        } else if let Some(delay) = options.delay {
            job = job.with_delay(delay);
        }
        job
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the attempt ceiling. Zero is raised to one so the job runs at least once.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay the first eligible time relative to creation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        self.scheduled_at = self
            .created_at
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self
    }

    /// Set an absolute first eligible time.
    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = at;
        self
    }

    /// Whether the dispatcher may claim this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now
    }

    /// Whether another failure would exhaust the attempt budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts.saturating_add(1) >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Failed.can_retry());
        assert!(!JobStatus::Cancelled.can_retry());
    }

    #[test]
    fn options_apply_delay_and_defaults() {
        let options = JobOptions::new()
            .priority(Priority::HIGH)
            .delay(Duration::from_secs(60));
        let job = Job::from_options("email", serde_json::json!({}), &options, 5);

        assert_eq!(job.priority, Priority::HIGH);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.scheduled_at - job.created_at, chrono::Duration::seconds(60));
        assert!(!job.is_eligible(Utc::now()));
    }

    #[test]
    fn scheduled_at_wins_over_delay() {
        let at = Utc::now() - chrono::Duration::seconds(5);
        let options = JobOptions::new()
            .delay(Duration::from_secs(600))
            .scheduled_at(at);
        let job = Job::from_options("email", serde_json::json!(null), &options, 3);

        assert_eq!(job.scheduled_at, at);
        assert!(job.is_eligible(Utc::now()));
    }

    #[test]
    fn last_attempt_detection() {
        let mut job = Job::new("x", serde_json::json!(1)).with_max_attempts(2);
        assert!(!job.is_last_attempt());
        job.attempts = 1;
        assert!(job.is_last_attempt());
    }
}
