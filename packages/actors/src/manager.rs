//! Two-tier queue facade: a durable store-backed tier and a fast in-memory tier.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::{JobStore, MemoryJobStore};
use queue_core::{Job, JobEvent, JobId, JobOptions, JobStatus, QueueConfig, QueueStats, Tier};
use ractor::{Actor, ActorRef};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::dispatcher::{DispatcherActor, DispatcherArgs, TierSettings};
use crate::error::QueueResult;
use crate::handler::{JobHandler, JobHandlerRegistry};
use crate::limiter::ConcurrencyLimiter;
use crate::messages::{DispatcherMessage, SweeperMessage};
use crate::sweeper::{self, CleanupSweeper, SweeperArgs};

const EVENT_CAPACITY: usize = 1024;
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Outcome of [`QueueManager::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs still running when the shutdown timeout expired.
    pub stranded: Vec<JobId>,
}

impl ShutdownReport {
    /// Whether every in-flight job finished before the timeout.
    pub fn is_clean(&self) -> bool {
        self.stranded.is_empty()
    }
}

struct RunningActors {
    durable: ActorRef<DispatcherMessage>,
    fast: ActorRef<DispatcherMessage>,
    sweeper: ActorRef<SweeperMessage>,
    handles: Vec<JoinHandle<()>>,
}

/// Accepts jobs, routes them to a tier and runs both tiers' dispatchers.
///
/// The store, handler registry and config are injected; nothing is global.
pub struct QueueManager<S: JobStore> {
    config: QueueConfig,
    store: Arc<S>,
    fast_store: Arc<MemoryJobStore>,
    handlers: Arc<JobHandlerRegistry>,
    event_tx: broadcast::Sender<JobEvent>,
    durable_limiter: ConcurrencyLimiter,
    fast_limiter: ConcurrencyLimiter,
    running: Mutex<Option<RunningActors>>,
}

impl<S: JobStore> QueueManager<S> {
    /// Create a manager over `store`. Fails if `config` is invalid.
    pub fn new(
        store: Arc<S>,
        handlers: Arc<JobHandlerRegistry>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            durable_limiter: ConcurrencyLimiter::new(config.concurrency),
            fast_limiter: ConcurrencyLimiter::new(config.fast.concurrency),
            fast_store: Arc::new(MemoryJobStore::new()),
            config,
            store,
            handlers,
            event_tx,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The durable tier's store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn handlers(&self) -> &Arc<JobHandlerRegistry> {
        &self.handlers
    }

    /// Register `handler` for `job_type`, replacing any previous one.
    pub fn register_handler<H: JobHandler>(&self, job_type: impl Into<String>, handler: H) {
        self.handlers.register(job_type, handler);
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Add a job and return its id.
    ///
    /// `options.durable` picks the tier, defaulting to `default_durable`.
    /// Fast-tier jobs live only in process memory: anything not yet processed
    /// is lost if the process exits or crashes. Use the durable tier for work
    /// that must survive a restart.
    pub async fn add(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<JobId> {
        let job = Job::from_options(job_type, payload, &options, self.config.default_max_attempts);
        let tier = if options.durable.unwrap_or(self.config.default_durable) {
            Tier::Durable
        } else {
            Tier::Fast
        };

        match tier {
            Tier::Durable => self.store.insert(&job).await?,
            Tier::Fast => self.fast_store.insert(&job).await?,
        }
        tracing::debug!(job_id = %job.id, job_type, %tier, "Job added");

        let id = job.id;
        let _ = self.event_tx.send(JobEvent::JobEnqueued {
            job,
            tier,
            timestamp: Utc::now(),
        });
        if tier == Tier::Fast {
            self.nudge_fast().await;
        }
        Ok(id)
    }

    /// Look a job up in either tier.
    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        if let Some(job) = self.store.get_by_id(id).await? {
            return Ok(Some(job));
        }
        Ok(self.fast_store.get_by_id(id).await?)
    }

    /// Jobs in `status` across both tiers, highest priority and oldest first.
    pub async fn get_jobs_by_status(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> QueueResult<Vec<Job>> {
        let mut jobs = self.store.list_by_status(status, limit).await?;
        jobs.extend(self.fast_store.list_by_status(status, limit).await?);
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Cancel a `pending` or `processing` job. A running handler is not
    /// interrupted; its result is discarded.
    pub async fn cancel_job(&self, id: JobId) -> QueueResult<bool> {
        let now = Utc::now();
        let tier = if self.store.cancel(id, now).await? {
            Tier::Durable
        } else if self.fast_store.cancel(id, now).await? {
            Tier::Fast
        } else {
            return Ok(false);
        };

        tracing::info!(job_id = %id, %tier, "Job cancelled");
        let _ = self.event_tx.send(JobEvent::JobCancelled {
            job_id: id,
            tier,
            timestamp: now,
        });
        Ok(true)
    }

    /// Move a `failed` job back to `pending` with attempts reset.
    pub async fn retry_job(&self, id: JobId) -> QueueResult<bool> {
        let now = Utc::now();
        let tier = if self.store.retry(id, now).await? {
            Tier::Durable
        } else if self.fast_store.retry(id, now).await? {
            Tier::Fast
        } else {
            return Ok(false);
        };

        tracing::info!(job_id = %id, %tier, "Job resubmitted");
        let _ = self.event_tx.send(JobEvent::JobRetried {
            job_id: id,
            tier,
            timestamp: now,
        });
        if tier == Tier::Fast {
            self.nudge_fast().await;
        }
        Ok(true)
    }

    /// Job counts for both tiers combined.
    pub async fn get_stats(&self) -> QueueResult<QueueStats> {
        Ok(self.tier_stats(Tier::Durable).await?.merge(self.tier_stats(Tier::Fast).await?))
    }

    /// Job counts for one tier.
    pub async fn tier_stats(&self, tier: Tier) -> QueueResult<QueueStats> {
        let stats = match tier {
            Tier::Durable => self.store.count_by_status().await?,
            Tier::Fast => self.fast_store.count_by_status().await?,
        };
        Ok(stats)
    }

    /// Delete `completed` and `cancelled` jobs older than `retention_days`.
    pub async fn cleanup(&self, retention_days: u32) -> QueueResult<u64> {
        Ok(sweeper::sweep(
            self.store.as_ref(),
            &self.fast_store,
            retention_days,
            &self.event_tx,
        )
        .await?)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start both tiers' dispatchers and the cleanup sweeper.
    ///
    /// Jobs a previous process left in `processing` are requeued first.
    pub async fn start(&self) -> QueueResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("Queue manager already started");
            return Ok(());
        }

        let requeued = self.store.requeue_processing(Utc::now()).await?;
        if requeued > 0 {
            tracing::warn!(requeued, "Requeued jobs left processing by a previous run");
        }

        let (durable, durable_handle) = Actor::spawn(
            None,
            DispatcherActor::<S>::new(),
            DispatcherArgs {
                store: self.store.clone(),
                handlers: self.handlers.clone(),
                limiter: self.durable_limiter.clone(),
                event_tx: self.event_tx.clone(),
                settings: TierSettings::durable(&self.config),
            },
        )
        .await?;

        let (fast, fast_handle) = Actor::spawn(
            None,
            DispatcherActor::<MemoryJobStore>::new(),
            DispatcherArgs {
                store: self.fast_store.clone(),
                handlers: self.handlers.clone(),
                limiter: self.fast_limiter.clone(),
                event_tx: self.event_tx.clone(),
                settings: TierSettings::fast(&self.config),
            },
        )
        .await?;

        let (sweeper, sweeper_handle) = Actor::spawn(
            None,
            CleanupSweeper::<S>::new(),
            SweeperArgs {
                store: self.store.clone(),
                fast_store: self.fast_store.clone(),
                retention_days: self.config.cleanup_after_days,
                interval: self.config.cleanup_interval(),
                event_tx: self.event_tx.clone(),
            },
        )
        .await?;

        *running = Some(RunningActors {
            durable,
            fast,
            sweeper,
            handles: vec![durable_handle, fast_handle, sweeper_handle],
        });
        tracing::info!("Queue manager started");
        Ok(())
    }

    /// Stop claiming, wait up to `shutdown_timeout` for in-flight jobs, then
    /// stop the actors. Jobs still running at the deadline are reported.
    pub async fn stop(&self) -> QueueResult<ShutdownReport> {
        let Some(actors) = self.running.lock().await.take() else {
            return Ok(ShutdownReport::default());
        };
        tracing::info!("Stopping queue manager");

        for dispatcher in [&actors.durable, &actors.fast] {
            let (tx, rx) = ractor::concurrency::oneshot();
            if dispatcher
                .send_message(DispatcherMessage::StopClaiming { reply: tx.into() })
                .is_ok()
            {
                let _ = rx.await;
            }
        }
        actors.sweeper.stop(None);

        let deadline = Instant::now() + self.config.shutdown_timeout();
        futures_util::future::join_all([
            drain(&self.durable_limiter, deadline),
            drain(&self.fast_limiter, deadline),
        ])
        .await;

        let mut stranded = self.durable_limiter.in_flight_ids();
        stranded.extend(self.fast_limiter.in_flight_ids());
        if !stranded.is_empty() {
            for id in &stranded {
                tracing::warn!(job_id = %id, "Job still running at shutdown timeout");
            }
            tracing::warn!(count = stranded.len(), "Shutdown timed out with jobs in flight");
        }

        actors.durable.stop(None);
        actors.fast.stop(None);
        for handle in actors.handles {
            let _ = handle.await;
        }

        tracing::info!("Queue manager stopped");
        Ok(ShutdownReport { stranded })
    }

    async fn nudge_fast(&self) {
        if let Some(actors) = self.running.lock().await.as_ref() {
            let _ = actors.fast.send_message(DispatcherMessage::Poll);
        }
    }
}

/// Wait until `limiter` has nothing in flight or `deadline` passes.
async fn drain(limiter: &ConcurrencyLimiter, deadline: Instant) {
    while !limiter.is_idle() && Instant::now() < deadline {
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

impl<S: JobStore> std::fmt::Debug for QueueManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("durable_in_flight", &self.durable_limiter.in_flight())
            .field("fast_in_flight", &self.fast_limiter.in_flight())
            .finish()
    }
}
