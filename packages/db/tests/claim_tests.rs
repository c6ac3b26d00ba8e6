use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use db::{JobStore, MemoryJobStore};
use queue_core::{Job, JobStatus};

async fn run_claimers(claimers: usize, jobs: usize, batch: usize) {
    let store = Arc::new(MemoryJobStore::new());
    let past = Utc::now() - chrono::Duration::seconds(1);
    for i in 0..jobs {
        let job = Job::new("claim", serde_json::json!(i)).with_scheduled_at(past);
        store.insert(&job).await.expect("insert");
    }

    let handles: Vec<_> = (0..claimers)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim_batch(batch, Utc::now()).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let claimed = handle.await.expect("claimer task").expect("claim");
        assert!(claimed.len() <= batch);
        for job in claimed {
            assert_eq!(job.status, JobStatus::Processing);
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
        }
    }

    assert_eq!(
        seen.len(),
        jobs.min(claimers * batch),
        "claimers={claimers} jobs={jobs} batch={batch}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_partition_the_pending_set() {
    for (claimers, jobs, batch) in [
        (2, 10, 3),
        (4, 10, 5),
        (8, 100, 10),
        (16, 37, 4),
        (3, 0, 5),
        (5, 200, 1),
    ] {
        run_claimers(claimers, jobs, batch).await;
    }
}
