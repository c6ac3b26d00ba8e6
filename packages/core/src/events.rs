//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, Tier};

/// Events emitted by the job queue system as jobs move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A new job was added.
    JobEnqueued {
        job: Job,
        tier: Tier,
        timestamp: DateTime<Utc>,
    },
    /// A worker started executing a claimed job.
    JobStarted {
        job_id: JobId,
        tier: Tier,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        tier: Tier,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job attempt failed.
    JobFailed {
        job_id: JobId,
        tier: Tier,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A job was cancelled.
    JobCancelled {
        job_id: JobId,
        tier: Tier,
        timestamp: DateTime<Utc>,
    },
    /// A failed job was manually resubmitted.
    JobRetried {
        job_id: JobId,
        tier: Tier,
        timestamp: DateTime<Utc>,
    },
    /// The cleanup sweeper removed old terminal jobs.
    JobsCleanedUp {
        deleted: u64,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::JobCancelled { timestamp, .. } => *timestamp,
            JobEvent::JobRetried { timestamp, .. } => *timestamp,
            JobEvent::JobsCleanedUp { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job, .. } => Some(job.id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::JobCancelled { job_id, .. } => Some(*job_id),
            JobEvent::JobRetried { job_id, .. } => Some(*job_id),
            JobEvent::JobsCleanedUp { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued { job, tier, .. } => {
                format!("Job {} ({}) enqueued on {} tier", job.id, job.job_type, tier)
            }
            JobEvent::JobStarted {
                job_id,
                worker_id,
                attempt,
                ..
            } => format!("Job {} started by {} (attempt {})", job_id, worker_id, attempt),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::JobCancelled { job_id, .. } => format!("Job {} cancelled", job_id),
            JobEvent::JobRetried { job_id, .. } => format!("Job {} resubmitted", job_id),
            JobEvent::JobsCleanedUp { deleted, .. } => {
                format!("Cleanup removed {} jobs", deleted)
            }
        }
    }
}
