//! Dispatcher actor: claims eligible jobs from one tier's store and hands
//! them to that tier's worker pool.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::JobStore;
use queue_core::{BackoffPolicy, Job, JobEvent, JobId, QueueConfig, Tier};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::handler::JobHandlerRegistry;
use crate::limiter::ConcurrencyLimiter;
use crate::messages::{DispatcherMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerState};

/// How one tier polls, claims and runs jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct TierSettings {
    pub tier: Tier,
    /// Worker pool size; also the limiter's bound.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Upper bound on jobs claimed per poll.
    pub batch_size: usize,
    /// At most one dispatch per interval when set.
    pub min_dispatch_interval: Option<Duration>,
    /// Jobs of one type handed to a single `process_batch` call. 1 disables batching.
    pub handler_batch_size: usize,
    pub job_timeout: Option<Duration>,
    pub backoff: BackoffPolicy,
}

impl TierSettings {
    pub fn durable(config: &QueueConfig) -> Self {
        Self {
            tier: Tier::Durable,
            concurrency: config.concurrency,
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
            min_dispatch_interval: None,
            handler_batch_size: 1,
            job_timeout: config.job_timeout(),
            backoff: config.backoff(),
        }
    }

    pub fn fast(config: &QueueConfig) -> Self {
        let fast = &config.fast;
        Self {
            tier: Tier::Fast,
            concurrency: fast.concurrency,
            poll_interval: fast.poll_interval(),
            batch_size: fast.batch_size,
            min_dispatch_interval: fast.min_dispatch_interval(),
            handler_batch_size: fast.handler_batch_size.unwrap_or(1).max(1),
            job_timeout: config.job_timeout(),
            backoff: config.backoff(),
        }
    }
}

/// Dispatcher actor arguments.
pub struct DispatcherArgs<S> {
    pub store: Arc<S>,
    pub handlers: Arc<JobHandlerRegistry>,
    pub limiter: ConcurrencyLimiter,
    pub event_tx: broadcast::Sender<JobEvent>,
    pub settings: TierSettings,
}

/// State for the dispatcher actor.
pub struct DispatcherState<S> {
    store: Arc<S>,
    settings: TierSettings,
    limiter: ConcurrencyLimiter,
    workers: Vec<ActorRef<WorkerMessage>>,
    idle: VecDeque<ActorRef<WorkerMessage>>,
    /// Claimed jobs waiting for an idle worker or for the rate limit.
    backlog: VecDeque<Vec<Job>>,
    claiming: bool,
    last_dispatch: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
}

impl<S: JobStore> DispatcherState<S> {
    fn rate_permits(&self) -> bool {
        match (self.settings.min_dispatch_interval, self.last_dispatch) {
            (Some(interval), Some(last)) => last.elapsed() >= interval,
            _ => true,
        }
    }

    async fn poll(&mut self) {
        self.dispatch_backlog();
        if !self.claiming || !self.backlog.is_empty() || !self.rate_permits() {
            return;
        }

        let chunk = self.settings.handler_batch_size;
        let mut slots = self
            .limiter
            .available()
            .min(self.idle.len().saturating_mul(chunk));
        if self.settings.min_dispatch_interval.is_some() {
            slots = slots.min(chunk);
        }
        let limit = slots.min(self.settings.batch_size);
        if limit == 0 {
            return;
        }

        let jobs = match self.store.claim_batch(limit, Utc::now()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(tier = %self.settings.tier, limit, "Failed to claim jobs: {}", e);
                return;
            }
        };
        if jobs.is_empty() {
            return;
        }

        tracing::debug!(tier = %self.settings.tier, claimed = jobs.len(), "Claimed jobs");
        for job in &jobs {
            if !self.limiter.try_acquire(job.id) {
                tracing::warn!(job_id = %job.id, "Claimed job beyond the concurrency limit");
            }
        }
        self.backlog.extend(group_by_type(jobs, chunk));
        self.dispatch_backlog();
    }

    fn dispatch_backlog(&mut self) {
        while !self.backlog.is_empty() && !self.idle.is_empty() && self.rate_permits() {
            let (Some(jobs), Some(worker)) = (self.backlog.pop_front(), self.idle.pop_front())
            else {
                break;
            };

            let ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
            match worker.send_message(WorkerMessage::Process { jobs }) {
                Ok(()) => {
                    if self.settings.min_dispatch_interval.is_some() {
                        self.last_dispatch = Some(Instant::now());
                    }
                }
                Err(e) => {
                    // The job stays `processing` in the store until the next
                    // startup requeues it.
                    for id in ids {
                        tracing::error!(
                            job_id = %id,
                            transition = "dispatch",
                            "Worker unavailable: {}",
                            e
                        );
                        self.limiter.release(id);
                    }
                }
            }
        }
    }
}

/// Split claimed jobs into dispatch units of at most `chunk` jobs, each of a
/// single type, keeping claim order.
fn group_by_type(jobs: Vec<Job>, chunk: usize) -> Vec<Vec<Job>> {
    if chunk <= 1 {
        return jobs.into_iter().map(|job| vec![job]).collect();
    }

    let mut groups: Vec<Vec<Job>> = Vec::new();
    let mut open: HashMap<String, usize> = HashMap::new();
    for job in jobs {
        let group = open
            .get(&job.job_type)
            .copied()
            .and_then(|index| groups.get_mut(index))
            .filter(|group| group.len() < chunk);
        match group {
            Some(group) => group.push(job),
            None => {
                open.insert(job.job_type.clone(), groups.len());
                groups.push(vec![job]);
            }
        }
    }
    groups
}

/// Dispatcher actor for one tier.
pub struct DispatcherActor<S>(PhantomData<fn() -> S>);

impl<S> DispatcherActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for DispatcherActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for DispatcherActor<S> {
    type Msg = DispatcherMessage;
    type State = DispatcherState<S>;
    type Arguments = DispatcherArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let settings = args.settings;
        tracing::info!(
            "Starting {} dispatcher with {} workers",
            settings.tier,
            settings.concurrency
        );

        let mut workers = Vec::with_capacity(settings.concurrency);
        for n in 1..=settings.concurrency {
            let worker_state = WorkerState {
                worker_id: format!("{}-worker-{}", settings.tier, n),
                tier: settings.tier,
                store: args.store.clone(),
                handlers: args.handlers.clone(),
                limiter: args.limiter.clone(),
                backoff: settings.backoff,
                job_timeout: settings.job_timeout,
                dispatcher: myself.clone(),
                event_tx: args.event_tx.clone(),
            };
            let (worker, _handle) =
                Actor::spawn_linked(None, WorkerActor::<S>::new(), worker_state, myself.get_cell())
                    .await
                    .map_err(|e| {
                        ActorProcessingErr::from(format!("Failed to spawn worker: {}", e))
                    })?;
            workers.push(worker);
        }

        // Start the poll loop
        let myself_clone = myself.clone();
        let poll_interval = settings.poll_interval;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(DispatcherMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(DispatcherState {
            store: args.store,
            limiter: args.limiter,
            idle: workers.iter().cloned().collect(),
            workers,
            settings,
            backlog: VecDeque::new(),
            claiming: true,
            last_dispatch: None,
            ticker: Some(ticker),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DispatcherMessage::Poll => {
                state.poll().await;
            }

            DispatcherMessage::WorkerIdle { worker } => {
                state.idle.push_back(worker);
                state.dispatch_backlog();
            }

            DispatcherMessage::StopClaiming { reply } => {
                tracing::info!("{} dispatcher stopped claiming", state.settings.tier);
                state.claiming = false;
                let _ = reply.send(());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        for worker in &state.workers {
            worker.stop(None);
        }
        tracing::info!("{} dispatcher stopped", state.settings.tier);
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let SupervisionEvent::ActorFailed(cell, reason) = message {
            tracing::error!(
                "{} worker {} failed: {}",
                state.settings.tier,
                cell.get_id(),
                reason
            );
        }
        Ok(())
    }
}
