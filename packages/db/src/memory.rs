//! In-memory job store.
//!
//! Backs the fast tier and doubles as a test store. Nothing is persisted:
//! jobs vanish with the process.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use queue_core::{Job, JobId, JobStatus, QueueStats};

use crate::store::{JobStore, StoreError};

/// Claim order: higher priority first, then older jobs first.
pub(crate) fn claim_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// A [`JobStore`] that keeps every job in a mutex-guarded map.
///
/// The claim is a single pass under the lock, so concurrent claimers can
/// never receive the same job.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently held.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Apply `update` to a `processing` job and return the result.
    fn transition(
        &self,
        id: JobId,
        operation: &str,
        update: impl FnOnce(&mut Job),
    ) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                update(job);
                Some(job.clone())
            }
            Some(job) => {
                tracing::warn!(
                    job_id = %id,
                    status = %job.status,
                    "Ignoring {} for job that is no longer processing",
                    operation
                );
                None
            }
            None => {
                tracing::warn!(job_id = %id, "Ignoring {} for unknown job", operation);
                None
            }
        }
    }
}

impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut jobs = self.jobs.lock();
        let mut eligible: Vec<&Job> = jobs.values().filter(|j| j.is_eligible(now)).collect();
        eligible.sort_by(|a, b| claim_order(a, b));
        let ids: Vec<JobId> = eligible.into_iter().take(limit).map(|j| j.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
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
        Ok(self.transition(id, "completion", |job| {
            job.status = JobStatus::Completed;
            job.attempts = attempts;
            job.completed_at = Some(now);
            job.updated_at = now;
        }))
    }

    async fn mark_failed(
        &self,
        id: JobId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self.transition(id, "failure", |job| {
            job.status = JobStatus::Failed;
            job.attempts = attempts;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
        }))
    }

    async fn reschedule(
        &self,
        id: JobId,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self.transition(id, "reschedule", |job| {
            job.status = JobStatus::Pending;
            job.attempts = attempts;
            job.error_message = Some(error.to_string());
            job.scheduled_at = next_attempt_at;
            job.started_at = None;
            job.updated_at = now;
        }))
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock();
        let mut matching: Vec<&Job> = jobs.values().filter(|j| j.status == status).collect();
        matching.sort_by(|a, b| claim_order(a, b));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    async fn count_by_status(&self) -> Result<QueueStats, StoreError> {
        let jobs = self.jobs.lock();
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }

    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status.is_cancellable() => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status.can_retry() => {
                job.status = JobStatus::Pending;
                job.attempts = 0;
                job.error_message = None;
                job.scheduled_at = now;
                job.started_at = None;
                job.completed_at = None;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_processing(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock();
        let mut count = 0;
        for job in jobs.values_mut().filter(|j| j.status == JobStatus::Processing) {
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_older_than(
        &self,
        statuses: &[JobStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| !(statuses.contains(&job.status) && job.updated_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}
