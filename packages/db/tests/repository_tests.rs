mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::{JobStore, StoreError};
use queue_core::{Job, JobStatus, Priority};

use common::{job_in_status, payload_with_message, setup_store};

#[tokio::test]
async fn insert_and_get_round_trip() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;

    let job = Job::new("email", payload_with_message("hi"))
        .with_priority(Priority::HIGH)
        .with_max_attempts(5)
        .with_delay(Duration::from_secs(30));
    store.insert(&job).await?;

    let loaded = store.get_by_id(job.id).await?.ok_or("job missing")?;
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.job_type, "email");
    assert_eq!(loaded.payload, payload_with_message("hi"));
    assert_eq!(loaded.status, JobStatus::Pending);
    assert_eq!(loaded.priority, Priority::HIGH);
    assert_eq!(loaded.max_attempts, 5);
    assert_eq!(loaded.attempts, 0);
    assert_eq!(
        loaded.scheduled_at.timestamp_millis(),
        job.scheduled_at.timestamp_millis()
    );
    assert!(loaded.started_at.is_none());

    assert!(store.get_by_id(queue_core::JobId::new()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_insert_is_a_store_error() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let job = Job::new("email", payload_with_message("once"));

    store.insert(&job).await?;
    let duplicate = store.insert(&job).await;
    assert!(matches!(duplicate, Err(StoreError::Duplicate(id)) if id == job.id));
    Ok(())
}

#[tokio::test]
async fn claim_respects_schedule_and_ordering() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let now = Utc::now();

    let seconds_ago = |s| now - chrono::Duration::seconds(s);
    let old_normal = job_in_status("old-normal", JobStatus::Pending, seconds_ago(20));
    let new_normal = job_in_status("new-normal", JobStatus::Pending, seconds_ago(10));
    let high = job_in_status("high", JobStatus::Pending, seconds_ago(5))
        .with_priority(Priority::HIGH);
    let future = Job::new("future", payload_with_message("later"))
        .with_delay(Duration::from_secs(3600));

    for job in [&old_normal, &new_normal, &high, &future] {
        store.insert(job).await?;
    }

    let claimed = store.claim_batch(2, now).await?;
    let types: Vec<&str> = claimed.iter().map(|j| j.job_type.as_str()).collect();
    assert_eq!(types, vec!["high", "old-normal"]);
    for job in &claimed {
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(
            job.started_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    let rest = store.claim_batch(10, now).await?;
    let types: Vec<&str> = rest.iter().map(|j| j.job_type.as_str()).collect();
    assert_eq!(types, vec!["new-normal"]);

    assert!(store.claim_batch(10, now).await?.is_empty());
    assert!(store.claim_batch(0, now).await?.is_empty());
    Ok(())
}

async fn race_claimers(
    jobs: usize,
    claimers: usize,
    batch: usize,
) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(setup_store().await?);
    let past = Utc::now() - chrono::Duration::seconds(1);

    let mut inserted = HashSet::new();
    for i in 0..jobs {
        let job = job_in_status(&format!("job-{i}"), JobStatus::Pending, past);
        inserted.insert(job.id);
        store.insert(&job).await?;
    }

    let tasks = (0..claimers).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.claim_batch(batch, Utc::now()).await })
    });
    let results = futures_util::future::join_all(tasks).await;

    let mut seen = HashSet::new();
    for result in results {
        for job in result?? {
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
            assert!(inserted.contains(&job.id));
        }
    }

    let expected = jobs.min(claimers * batch);
    assert_eq!(seen.len(), expected);

    let stats = store.count_by_status().await?;
    assert_eq!(stats.processing, expected as u64);
    assert_eq!(stats.pending + stats.processing, jobs as u64);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_split_jobs_without_sharing() -> Result<(), Box<dyn Error>> {
    race_claimers(12, 4, 5).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_drain_every_pending_job() -> Result<(), Box<dyn Error>> {
    for _ in 0..5 {
        race_claimers(40, 8, 10).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_stop_at_their_batch_total() -> Result<(), Box<dyn Error>> {
    race_claimers(30, 3, 4).await
}

#[tokio::test]
async fn unbounded_list_limit_returns_every_row() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let past = Utc::now() - chrono::Duration::seconds(1);
    for i in 0..3 {
        store
            .insert(&job_in_status(&format!("failed-{i}"), JobStatus::Failed, past))
            .await?;
    }

    assert_eq!(store.list_by_status(JobStatus::Failed, usize::MAX).await?.len(), 3);
    assert!(store.list_by_status(JobStatus::Failed, 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn transitions_only_apply_to_processing_jobs() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let now = Utc::now();

    let job = Job::new("email", payload_with_message("t"));
    store.insert(&job).await?;

    // Still pending: every worker transition is a no-op.
    assert!(store.mark_completed(job.id, 1, now).await?.is_none());
    assert!(store.mark_failed(job.id, 1, "boom", now).await?.is_none());

    store.claim_batch(1, now).await?;
    let next = now + chrono::Duration::seconds(2);
    let rescheduled = store
        .reschedule(job.id, 1, "timeout", next, now)
        .await?
        .ok_or("reschedule should apply")?;
    assert_eq!(rescheduled.status, JobStatus::Pending);
    assert_eq!(rescheduled.attempts, 1);
    assert_eq!(rescheduled.error_message.as_deref(), Some("timeout"));
    assert_eq!(rescheduled.scheduled_at.timestamp_millis(), next.timestamp_millis());
    assert!(rescheduled.started_at.is_none());

    assert!(store.claim_batch(1, now).await?.is_empty());
    assert_eq!(store.claim_batch(1, next).await?.len(), 1);

    let failed = store
        .mark_failed(job.id, 2, "boom", next)
        .await?
        .ok_or("failure should apply")?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.error_message.as_deref(), Some("boom"));
    assert!(failed.completed_at.is_some());

    assert!(store.mark_completed(job.id, 3, next).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn cancel_and_retry_semantics() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let now = Utc::now();

    let pending = Job::new("a", payload_with_message("p"));
    let completed = job_in_status("b", JobStatus::Completed, now);
    let failed = {
        let mut job = job_in_status("c", JobStatus::Failed, now);
        job.attempts = 3;
        job.error_message = Some("boom".into());
        job
    };
    for job in [&pending, &completed, &failed] {
        store.insert(job).await?;
    }

    assert!(store.cancel(pending.id, now).await?);
    assert!(!store.cancel(pending.id, now).await?, "already cancelled");
    assert!(!store.cancel(completed.id, now).await?);
    let still_completed = store.get_by_id(completed.id).await?.ok_or("missing")?;
    assert_eq!(still_completed.status, JobStatus::Completed);

    assert!(!store.retry(completed.id, now).await?);
    assert!(!store.retry(pending.id, now).await?);
    assert!(store.retry(failed.id, now).await?);

    let retried = store.get_by_id(failed.id).await?.ok_or("missing")?;
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 0);
    assert!(retried.error_message.is_none());
    assert!(retried.completed_at.is_none());
    Ok(())
}

#[tokio::test]
async fn counts_and_lists_by_status() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let now = Utc::now();

    store.insert(&job_in_status("p1", JobStatus::Pending, now)).await?;
    store.insert(&job_in_status("p2", JobStatus::Pending, now)).await?;
    store.insert(&job_in_status("c1", JobStatus::Completed, now)).await?;
    store.insert(&job_in_status("f1", JobStatus::Failed, now)).await?;

    let stats = store.count_by_status().await?;
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.total, 4);

    let pending = store.list_by_status(JobStatus::Pending, 10).await?;
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|j| j.status == JobStatus::Pending));
    assert_eq!(store.list_by_status(JobStatus::Pending, 1).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cleanup_deletes_only_old_completed_and_cancelled() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let now = Utc::now();
    let old = now - chrono::Duration::days(10);
    let cutoff = now - chrono::Duration::days(7);

    let old_completed = job_in_status("old-completed", JobStatus::Completed, old);
    let old_cancelled = job_in_status("old-cancelled", JobStatus::Cancelled, old);
    let old_failed = job_in_status("old-failed", JobStatus::Failed, old);
    let old_pending = job_in_status("old-pending", JobStatus::Pending, old);
    let old_processing = job_in_status("old-processing", JobStatus::Processing, old);
    let fresh_completed = job_in_status("fresh-completed", JobStatus::Completed, now);

    for job in [
        &old_completed,
        &old_cancelled,
        &old_failed,
        &old_pending,
        &old_processing,
        &fresh_completed,
    ] {
        store.insert(job).await?;
    }

    let deleted = store
        .delete_older_than(&[JobStatus::Completed, JobStatus::Cancelled], cutoff)
        .await?;
    assert_eq!(deleted, 2);

    assert!(store.get_by_id(old_completed.id).await?.is_none());
    assert!(store.get_by_id(old_cancelled.id).await?.is_none());
    for survivor in [&old_failed, &old_pending, &old_processing, &fresh_completed] {
        assert!(store.get_by_id(survivor.id).await?.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn requeue_processing_recovers_stranded_jobs() -> Result<(), Box<dyn Error>> {
    let store = setup_store().await?;
    let now = Utc::now();

    store.insert(&job_in_status("stranded", JobStatus::Processing, now)).await?;
    store.insert(&job_in_status("done", JobStatus::Completed, now)).await?;

    assert_eq!(store.requeue_processing(now).await?, 1);
    let stats = store.count_by_status().await?;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.completed, 1);
    Ok(())
}
