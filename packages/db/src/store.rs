//! The storage contract the dispatcher and workers rely on.

use std::future::Future;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobStatus, QueueStats};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Job already exists: {0}")]
    Duplicate(JobId),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the database rejected a transaction because it raced another
    /// writer. Such a transaction can be retried.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Database(e) => e.to_string().contains("conflict"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Durable or ephemeral job storage.
///
/// Transition methods (`mark_*`, `reschedule`) only apply to jobs that are
/// currently `processing`. They return the updated job, or `None` when the
/// job is missing or has already left `processing` (for example because it
/// was cancelled while its handler ran).
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new job. Fails with [`StoreError::Duplicate`] if the id exists.
    fn insert(&self, job: &Job) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically claim up to `limit` eligible jobs.
    ///
    /// Eligible means `pending` with `scheduled_at <= now`. Claimed jobs are
    /// returned in `priority DESC, created_at ASC` order, already moved to
    /// `processing` with `started_at = now`. No job is handed to two callers.
    fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// `processing -> completed`, recording the attempt count reached.
    fn mark_completed(
        &self,
        id: JobId,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// `processing -> failed` (terminal).
    fn mark_failed(
        &self,
        id: JobId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// `processing -> pending`, eligible again at `next_attempt_at`.
    fn reschedule(
        &self,
        id: JobId,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    fn get_by_id(&self, id: JobId) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Jobs in `status`, highest priority and oldest first.
    fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    fn count_by_status(&self) -> impl Future<Output = Result<QueueStats, StoreError>> + Send;

    /// `pending|processing -> cancelled`. Returns `false` if the job is
    /// missing or already terminal.
    fn cancel(
        &self,
        id: JobId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// `failed -> pending` with attempts reset and the error cleared.
    /// Returns `false` unless the job was `failed`.
    fn retry(
        &self,
        id: JobId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Move every `processing` job back to `pending`.
    ///
    /// Called once at startup: with a single consumer per store, anything
    /// still `processing` was stranded by a previous process.
    fn requeue_processing(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Delete jobs in any of `statuses` last updated before `cutoff`.
    fn delete_older_than(
        &self,
        statuses: &[JobStatus],
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
