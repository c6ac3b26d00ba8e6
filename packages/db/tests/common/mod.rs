#![allow(dead_code)]

use chrono::{DateTime, Utc};
use db::{DbConfig, StoreError, repositories::JobRepository};
use queue_core::{Job, JobStatus};
use serde_json::{Map, Value};

/// A repository over a fresh, empty in-memory SurrealDB instance.
pub async fn setup_store() -> Result<JobRepository, StoreError> {
    JobRepository::connect(&DbConfig::memory()).await
}

pub fn payload_with_message(message: &str) -> Value {
    let mut map = Map::new();
    map.insert("msg".to_string(), Value::String(message.to_string()));
    Value::Object(map)
}

/// A job already in `status`, last touched at `updated_at`.
pub fn job_in_status(job_type: &str, status: JobStatus, updated_at: DateTime<Utc>) -> Job {
    let mut job = Job::new(job_type, payload_with_message(job_type));
    job.status = status;
    job.created_at = updated_at;
    job.scheduled_at = updated_at;
    job.updated_at = updated_at;
    if status.is_terminal() {
        job.completed_at = Some(updated_at);
    }
    job
}
