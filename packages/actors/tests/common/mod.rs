#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use actors::{
    HandlerFuture, HookFuture, Job, JobHandler, JobHandlerRegistry, JobId, JobStatus, QueueConfig,
    QueueManager,
};
use db::{JobStore, MemoryJobStore};
use parking_lot::Mutex;
use tokio::time::Instant;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Fast polling, short retries, no jitter.
pub fn test_config() -> QueueConfig {
    let mut config = QueueConfig {
        concurrency: 2,
        poll_interval_ms: 20,
        batch_size: 10,
        base_retry_delay_ms: 10,
        max_retry_delay_ms: 100,
        jitter: false,
        shutdown_timeout_ms: 2_000,
        job_timeout_ms: Some(5_000),
        ..QueueConfig::default()
    };
    config.fast.poll_interval_ms = 10;
    config
}

/// A manager over an in-memory durable store, with its registry.
pub fn memory_manager(
    config: QueueConfig,
) -> Result<(QueueManager<MemoryJobStore>, Arc<JobHandlerRegistry>), Box<dyn Error>> {
    let registry = Arc::new(JobHandlerRegistry::new());
    let manager = QueueManager::new(Arc::new(MemoryJobStore::new()), registry.clone(), config)?;
    Ok((manager, registry))
}

/// Poll `get_job` until `done` holds or `timeout` passes.
pub async fn wait_for_job<S: JobStore>(
    manager: &QueueManager<S>,
    id: JobId,
    timeout: Duration,
    done: impl Fn(&Job) -> bool,
) -> Result<Job, Box<dyn Error>> {
    let deadline = Instant::now() + timeout;
    loop {
        let job = manager.get_job(id).await?.ok_or("job missing")?;
        if done(&job) {
            return Ok(job);
        }
        if Instant::now() >= deadline {
            let status = job.status;
            return Err(format!("timed out waiting for job {id}, last status {status}").into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status<S: JobStore>(
    manager: &QueueManager<S>,
    id: JobId,
    status: JobStatus,
) -> Result<Job, Box<dyn Error>> {
    wait_for_job(manager, id, Duration::from_secs(5), |job| job.status == status).await
}

/// Fails every time, counting calls.
#[derive(Default)]
pub struct AlwaysFails {
    pub calls: Arc<AtomicU32>,
}

impl JobHandler for AlwaysFails {
    fn process(&self, _job: &Job) -> HandlerFuture {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move { Err(format!("attempt {attempt} failed")) })
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct FailsThenSucceeds {
    pub failures: u32,
    pub calls: AtomicU32,
}

impl FailsThenSucceeds {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

impl JobHandler for FailsThenSucceeds {
    fn process(&self, _job: &Job) -> HandlerFuture {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = call < self.failures;
        Box::pin(async move {
            if fail {
                Err("transient failure".to_string())
            } else {
                Ok(())
            }
        })
    }
}

/// Sleeps, tracking how many calls overlap.
pub struct Sleeps {
    pub duration: Duration,
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
}

impl Sleeps {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl JobHandler for Sleeps {
    fn process(&self, _job: &Job) -> HandlerFuture {
        let duration = self.duration;
        let current = self.current.clone();
        let peak = self.peak.clone();
        let finished = self.finished.clone();
        Box::pin(async move {
            let running = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            current.fetch_sub(1, Ordering::SeqCst);
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Records each invocation: the job types it saw and when it started.
#[derive(Default)]
pub struct Recorder {
    pub invocations: Arc<Mutex<Vec<(Vec<String>, Instant)>>>,
    pub successes: Arc<AtomicU32>,
    pub failures: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.invocations.lock().iter().map(|(jobs, _)| jobs.len()).collect()
    }

    pub fn order(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .flat_map(|(jobs, _)| jobs.clone())
            .collect()
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.invocations.lock().iter().map(|(_, at)| *at).collect()
    }

    fn record(&self, jobs: &[Job]) {
        let labels = jobs
            .iter()
            .map(|job| {
                job.payload
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| job.job_type.clone())
            })
            .collect();
        self.invocations.lock().push((labels, Instant::now()));
    }
}

impl JobHandler for Recorder {
    fn process(&self, job: &Job) -> HandlerFuture {
        self.record(std::slice::from_ref(job));
        Box::pin(async { Ok(()) })
    }

    fn process_batch(&self, jobs: &[Job]) -> HandlerFuture {
        self.record(jobs);
        Box::pin(async { Ok(()) })
    }

    fn on_success(&self, _job: &Job) -> HookFuture {
        self.successes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn on_failure(&self, _job: &Job, error: &str) -> HookFuture {
        self.failures.lock().push(error.to_string());
        Box::pin(async {})
    }
}
