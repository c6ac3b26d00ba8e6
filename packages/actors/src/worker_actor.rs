//! Worker actor for executing jobs.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{JobStore, StoreError};
use queue_core::{BackoffPolicy, Job, JobEvent, JobId, Tier};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::handler::{HandlerFuture, HandlerResult, HookFuture, JobHandler, JobHandlerRegistry};
use crate::limiter::ConcurrencyLimiter;
use crate::messages::{DispatcherMessage, WorkerMessage};

/// Store transitions are attempted this many times before giving up.
const STORE_ATTEMPTS: u32 = 3;
const STORE_RETRY_STEP: Duration = Duration::from_millis(100);

/// State for the worker actor.
pub struct WorkerState<S> {
    /// Unique worker ID, e.g. `durable-worker-3`.
    pub worker_id: String,
    pub tier: Tier,
    pub store: Arc<S>,
    pub handlers: Arc<JobHandlerRegistry>,
    /// Shared with the dispatcher; released here once a job is finished.
    pub limiter: ConcurrencyLimiter,
    pub backoff: BackoffPolicy,
    pub job_timeout: Option<Duration>,
    /// Notified whenever this worker becomes idle.
    pub dispatcher: ActorRef<DispatcherMessage>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

impl<S: JobStore> WorkerState<S> {
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run a claimed job (or handler batch) to a stored outcome.
    async fn run(&self, jobs: Vec<Job>) {
        let ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();

        if let Some(job_type) = jobs.first().map(|job| job.job_type.clone()) {
            match self.handlers.get(&job_type) {
                Some(handler) => self.run_handler(handler, jobs).await,
                None => {
                    let error = format!("No handler registered for job type '{}'", job_type);
                    for job in &jobs {
                        self.fail_unhandled(job, &error).await;
                    }
                }
            }
        }

        for id in ids {
            self.limiter.release(id);
        }
    }

    /// A missing handler is a configuration error: fail at once, attempts untouched.
    async fn fail_unhandled(&self, job: &Job, error: &str) {
        tracing::warn!(job_id = %job.id, job_type = %job.job_type, "{}", error);

        let store = &*self.store;
        let (id, attempts, now) = (job.id, job.attempts, Utc::now());
        let stored = with_retries(id, "processing -> failed", move || {
            store.mark_failed(id, attempts, error, now)
        })
        .await;

        if let Ok(Some(_)) = stored {
            self.broadcast(JobEvent::JobFailed {
                job_id: id,
                tier: self.tier,
                error: error.to_string(),
                attempts,
                will_retry: false,
                timestamp: now,
            });
        }
    }

    async fn run_handler(&self, handler: Arc<dyn JobHandler>, jobs: Vec<Job>) {
        for job in &jobs {
            tracing::debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                worker_id = %self.worker_id,
                "Processing job"
            );
            self.broadcast(JobEvent::JobStarted {
                job_id: job.id,
                tier: self.tier,
                worker_id: self.worker_id.clone(),
                attempt: job.attempts.saturating_add(1),
                timestamp: Utc::now(),
            });
        }

        let started = Instant::now();
        let future = match jobs.as_slice() {
            [job] => handler.process(job),
            batch => handler.process_batch(batch),
        };
        let result = execute(future, self.job_timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let jitter = handler.retry_jitter().unwrap_or(self.backoff.jitter);
        for job in &jobs {
            match &result {
                Ok(()) => self.complete(handler.as_ref(), job, duration_ms).await,
                Err(error) => self.fail(handler.as_ref(), job, error, jitter).await,
            }
        }
    }

    async fn complete(&self, handler: &dyn JobHandler, job: &Job, duration_ms: u64) {
        let store = &*self.store;
        let (id, attempts, now) = (job.id, job.attempts.saturating_add(1), Utc::now());
        let stored = with_retries(id, "processing -> completed", move || {
            store.mark_completed(id, attempts, now)
        })
        .await;

        match stored {
            Ok(Some(updated)) => {
                tracing::debug!(job_id = %id, duration_ms, "Job completed");
                self.broadcast(JobEvent::JobCompleted {
                    job_id: id,
                    tier: self.tier,
                    duration_ms,
                    timestamp: now,
                });
                run_hook(handler.on_success(&updated), id, "on_success").await;
            }
            Ok(None) => {
                tracing::debug!(job_id = %id, "Discarding result of job that left processing");
            }
            Err(_) => {}
        }
    }

    async fn fail(&self, handler: &dyn JobHandler, job: &Job, error: &str, jitter: bool) {
        let store = &*self.store;
        let (id, attempts, now) = (job.id, job.attempts.saturating_add(1), Utc::now());
        let will_retry = attempts < job.max_attempts;

        let stored = if will_retry {
            let delay = self.backoff.with_jitter(jitter).delay(attempts);
            let next_attempt_at = retry_at(now, delay);
            tracing::info!(
                job_id = %id,
                attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "Job failed, rescheduling: {}",
                error
            );
            with_retries(id, "processing -> pending", move || {
                store.reschedule(id, attempts, error, next_attempt_at, now)
            })
            .await
        } else {
            tracing::warn!(
                job_id = %id,
                attempts,
                "Job failed permanently: {}",
                error
            );
            with_retries(id, "processing -> failed", move || {
                store.mark_failed(id, attempts, error, now)
            })
            .await
        };

        match stored {
            Ok(Some(updated)) => {
                self.broadcast(JobEvent::JobFailed {
                    job_id: id,
                    tier: self.tier,
                    error: error.to_string(),
                    attempts,
                    will_retry,
                    timestamp: now,
                });
                run_hook(handler.on_failure(&updated, error), id, "on_failure").await;
            }
            Ok(None) => {
                tracing::debug!(job_id = %id, "Discarding failure of job that left processing");
            }
            Err(_) => {}
        }
    }
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Run a handler future on its own task so a panic or timeout becomes an
/// ordinary handler error.
async fn execute(future: HandlerFuture, timeout: Option<Duration>) -> HandlerResult {
    let mut task = tokio::spawn(future);

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(format!("Job timed out after {}ms", limit.as_millis()));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err("Handler panicked".to_string()),
        Err(e) => Err(format!("Handler task failed: {}", e)),
    }
}

async fn run_hook(hook: HookFuture, job_id: JobId, hook_name: &str) {
    if let Err(e) = tokio::spawn(hook).await {
        tracing::error!(job_id = %job_id, hook = hook_name, "Hook did not complete: {}", e);
    }
}

/// Retry a store transition with linear backoff. Every failure is logged
/// with the job id and transition; the last error is returned.
async fn with_retries<T, F, Fut>(
    job_id: JobId,
    transition: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < STORE_ATTEMPTS => {
                tracing::error!(
                    job_id = %job_id,
                    transition,
                    attempt,
                    "Store transition failed, retrying: {}",
                    e
                );
                tokio::time::sleep(STORE_RETRY_STEP * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    transition,
                    attempt,
                    "Store transition failed, giving up: {}",
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Worker actor that executes jobs handed to it by a dispatcher.
pub struct WorkerActor<S>(PhantomData<fn() -> S>);

impl<S> WorkerActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for WorkerActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for WorkerActor<S> {
    type Msg = WorkerMessage;
    type State = WorkerState<S>;
    type Arguments = WorkerState<S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker: {}", args.worker_id);
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Process { jobs } => {
                state.run(jobs).await;

                let idle = DispatcherMessage::WorkerIdle {
                    worker: myself.clone(),
                };
                if state.dispatcher.send_message(idle).is_err() {
                    tracing::debug!("Dispatcher gone, stopping worker: {}", state.worker_id);
                    myself.stop(None);
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::debug!("Worker stopped: {}", state.worker_id);
        Ok(())
    }
}
