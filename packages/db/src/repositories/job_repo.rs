//! SurrealDB-backed job store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobStatus, Priority, QueueStats};
use serde::{Deserialize, Serialize};

use crate::store::{JobStore, StoreError};
use crate::{Database, DbConfig};

const TABLE: &str = "job";

/// Select-then-update rounds per `claim_batch` call.
const CLAIM_ROUNDS: usize = 16;
/// Tries per statement that hits a transaction conflict.
const CONFLICT_ATTEMPTS: u32 = 10;
const CONFLICT_STEP: Duration = Duration::from_millis(2);

/// Durable [`JobStore`] persisting one record per job in the `job` table.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    job_type: String,
    payload: String,
    status: String,
    priority: i64,
    attempts: i64,
    max_attempts: i64,
    error_message: Option<String>,
    scheduled_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self, StoreError> {
        Ok(Self {
            job_id: job.id.to_string(),
            job_type: job.job_type.clone(),
            payload: serde_json::to_string(&job.payload)?,
            status: job.status.as_str().to_string(),
            priority: i64::from(job.priority.0),
            attempts: i64::from(job.attempts),
            max_attempts: i64::from(job.max_attempts),
            error_message: job.error_message.clone(),
            scheduled_at: job.scheduled_at.timestamp_millis(),
            started_at: job.started_at.map(|t| t.timestamp_millis()),
            completed_at: job.completed_at.map(|t| t.timestamp_millis()),
            created_at: job.created_at.timestamp_millis(),
            updated_at: job.updated_at.timestamp_millis(),
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| StoreError::Serialization(format!("bad job id {}: {}", self.job_id, e)))?;
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Job {
            id,
            job_type: self.job_type,
            payload: serde_json::from_str(&self.payload)?,
            status,
            priority: Priority(narrow(self.priority)?),
            attempts: narrow(self.attempts)?,
            max_attempts: narrow(self.max_attempts)?,
            error_message: self.error_message,
            scheduled_at: from_millis(self.scheduled_at)?,
            started_at: self.started_at.map(from_millis).transpose()?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn narrow<T: TryFrom<i64>>(value: i64) -> Result<T, StoreError> {
    T::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("integer out of range: {}", value)))
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, StoreError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

impl JobRepository {
    /// Wrap an existing connection. The schema must already be defined.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect, define the schema and return a ready repository.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let db = crate::init(config).await?;
        Ok(Self::new(db))
    }

    /// The underlying connection.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Decode the row changed by a single-record conditional update.
    ///
    /// An empty result means the `WHERE` guard did not hold: the job is
    /// missing or no longer in the status the transition expects.
    fn changed_row(
        id: JobId,
        operation: &str,
        mut response: surrealdb::Response,
    ) -> Result<Option<Job>, StoreError> {
        let records: Vec<JobRecord> = response.take(0)?;

        match records.into_iter().next() {
            Some(record) => Ok(Some(record.into_job()?)),
            None => {
                tracing::warn!(
                    job_id = %id,
                    "Ignoring {}: job missing or not in the expected status",
                    operation
                );
                Ok(None)
            }
        }
    }

    /// Ids of up to `limit` eligible jobs, in claim order.
    async fn claim_candidates(&self, limit: usize, now_ms: i64) -> Result<Vec<String>, StoreError> {
        #[derive(Deserialize)]
        struct Candidate {
            job_id: String,
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let mut response = self
                    .db
                    .query(
                        r#"
                        SELECT job_id, priority, created_at FROM job
                        WHERE status = "pending" AND scheduled_at <= $now
                        ORDER BY priority DESC, created_at ASC, job_id ASC
                        LIMIT $limit
                        "#,
                    )
                    .bind(("now", now_ms))
                    .bind(("limit", query_limit(limit)))
                    .await?;
                let candidates: Vec<Candidate> = response.take(0)?;
                Ok::<_, StoreError>(candidates)
            }
            .await;

            match result {
                Ok(candidates) => return Ok(candidates.into_iter().map(|c| c.job_id).collect()),
                Err(e) if e.is_conflict() && attempt < CONFLICT_ATTEMPTS => {
                    conflict_pause(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Conditionally move one candidate to `processing`. A row another
    /// claimer took first no longer matches `status = "pending"` and comes
    /// back empty. A write conflict with that claimer is retried, after
    /// which the row reads as taken.
    async fn claim_one(&self, job_id: &str, now_ms: i64) -> Result<Option<Job>, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let mut response = self
                    .db
                    .query(
                        r#"
                        UPDATE type::thing("job", $id)
                        SET status = "processing", started_at = $now, updated_at = $now
                        WHERE status = "pending" AND scheduled_at <= $now
                        RETURN AFTER
                        "#,
                    )
                    .bind(("id", job_id.to_string()))
                    .bind(("now", now_ms))
                    .await?;
                let records: Vec<JobRecord> = response.take(0)?;
                Ok::<_, StoreError>(records)
            }
            .await;

            match result {
                Ok(records) => {
                    return records.into_iter().next().map(JobRecord::into_job).transpose();
                }
                Err(e) if e.is_conflict() && attempt < CONFLICT_ATTEMPTS => {
                    tracing::debug!(job_id, attempt, "Claim conflicted with another claimer");
                    conflict_pause(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Return what was claimed so far when a later query fails. Rows already
/// moved to `processing` belong to this caller and must reach a worker.
fn partial_claim(
    claimed: Vec<Job>,
    job_id: Option<&str>,
    error: StoreError,
) -> Result<Vec<Job>, StoreError> {
    if claimed.is_empty() {
        return Err(error);
    }
    tracing::error!(
        job_id = job_id.unwrap_or("-"),
        claimed = claimed.len(),
        "Claim stopped early: {}",
        error
    );
    Ok(claimed)
}

async fn conflict_pause(attempt: u32) {
    tokio::time::sleep(CONFLICT_STEP * attempt).await;
}

/// SurrealDB rejects negative limits; anything past `i64::MAX` means "all".
fn query_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl JobStore for JobRepository {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let record = JobRecord::from_job(job)?;

        let created: Result<Option<JobRecord>, surrealdb::Error> = self
            .db
            .create((TABLE, job.id.to_string()))
            .content(record)
            .await;

        match created {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(StoreError::Query(format!("Failed to create job {}", job.id))),
            Err(e) if e.to_string().contains("already exists") => {
                Err(StoreError::Duplicate(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let now_ms = now.timestamp_millis();
        let mut claimed = Vec::new();

        for _ in 0..CLAIM_ROUNDS {
            let remaining = limit - claimed.len();
            if remaining == 0 {
                break;
            }

            let candidates = match self.claim_candidates(remaining, now_ms).await {
                Ok(candidates) => candidates,
                Err(e) => return partial_claim(claimed, None, e),
            };
            if candidates.is_empty() {
                break;
            }

            // Rows lost to another claimer leave this round short; select
            // again so the caller still gets up to `limit` jobs.
            let exhausted = candidates.len() < remaining;
            let mut lost = false;
            for job_id in candidates {
                match self.claim_one(&job_id, now_ms).await {
                    Ok(Some(job)) => claimed.push(job),
                    Ok(None) => lost = true,
                    Err(e) => return partial_claim(claimed, Some(&job_id), e),
                }
            }
            if exhausted && !lost {
                break;
            }
        }

        Ok(claimed)
    }

    async fn mark_completed(
        &self,
        id: JobId,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let response = self
            .db
            .query(
                r#"
                UPDATE type::thing("job", $id)
                SET status = "completed", attempts = $attempts, completed_at = $now,
                    updated_at = $now
                WHERE status = "processing"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("attempts", i64::from(attempts)))
            .bind(("now", now.timestamp_millis()))
            .await?;

        Self::changed_row(id, "completion", response)
    }

    async fn mark_failed(
        &self,
        id: JobId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let response = self
            .db
            .query(
                r#"
                UPDATE type::thing("job", $id)
                SET status = "failed", attempts = $attempts, error_message = $error,
                    completed_at = $now, updated_at = $now
                WHERE status = "processing"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("attempts", i64::from(attempts)))
            .bind(("error", error.to_string()))
            .bind(("now", now.timestamp_millis()))
            .await?;

        Self::changed_row(id, "failure", response)
    }

    async fn reschedule(
        &self,
        id: JobId,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let response = self
            .db
            .query(
                r#"
                UPDATE type::thing("job", $id)
                SET status = "pending", attempts = $attempts, error_message = $error,
                    scheduled_at = $next, started_at = NONE, updated_at = $now
                WHERE status = "processing"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("attempts", i64::from(attempts)))
            .bind(("error", error.to_string()))
            .bind(("next", next_attempt_at.timestamp_millis()))
            .bind(("now", now.timestamp_millis()))
            .await?;

        Self::changed_row(id, "reschedule", response)
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let record: Option<JobRecord> = self.db.select((TABLE, id.to_string())).await?;
        record.map(JobRecord::into_job).transpose()
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE status = $status
                ORDER BY priority DESC, created_at ASC, job_id ASC
                LIMIT $limit
                "#,
            )
            .bind(("status", status.as_str().to_string()))
            .bind(("limit", query_limit(limit)))
            .await?;

        into_jobs(response.take(0)?)
    }

    async fn count_by_status(&self) -> Result<QueueStats, StoreError> {
        #[derive(Deserialize)]
        struct StatusCount {
            status: Option<String>,
            count: i64,
        }

        let mut response = self
            .db
            .query("SELECT status, count() AS count FROM job GROUP BY status")
            .await?;
        let counts: Vec<StatusCount> = response.take(0)?;

        let mut stats = QueueStats::default();
        for count in counts {
            let Some(status) = count.status else { continue };
            match status.parse::<JobStatus>() {
                Ok(status) => stats.record(status, narrow(count.count)?),
                Err(e) => tracing::warn!("Skipping rows with {}", e),
            }
        }
        Ok(stats)
    }

    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing("job", $id)
                SET status = "cancelled", completed_at = $now, updated_at = $now
                WHERE status IN ["pending", "processing"]
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", now.timestamp_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;
        Ok(!records.is_empty())
    }

    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing("job", $id)
                SET status = "pending", attempts = 0, error_message = NONE,
                    scheduled_at = $now, started_at = NONE, completed_at = NONE,
                    updated_at = $now
                WHERE status = "failed"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", now.timestamp_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;
        Ok(!records.is_empty())
    }

    async fn requeue_processing(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE job
                SET status = "pending", started_at = NONE, updated_at = $now
                WHERE status = "processing"
                RETURN AFTER
                "#,
            )
            .bind(("now", now.timestamp_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;
        Ok(records.len() as u64)
    }

    async fn delete_older_than(
        &self,
        statuses: &[JobStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let mut response = self
            .db
            .query(
                r#"
                DELETE job
                WHERE status IN $statuses AND updated_at < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("statuses", statuses))
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;
        let records: Vec<JobRecord> = response.take(0)?;
        Ok(records.len() as u64)
    }
}
