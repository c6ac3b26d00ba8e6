//! Periodic deletion of old terminal jobs.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{JobStore, MemoryJobStore, StoreError};
use queue_core::{JobEvent, JobStatus};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::messages::SweeperMessage;

/// Statuses the sweeper may delete. `failed` jobs stay for inspection.
pub const CLEANUP_STATUSES: [JobStatus; 2] = [JobStatus::Completed, JobStatus::Cancelled];

/// Delete `completed` and `cancelled` jobs not updated in `retention_days`
/// from both tiers. Returns the number deleted.
pub async fn sweep<S: JobStore>(
    store: &S,
    fast_store: &MemoryJobStore,
    retention_days: u32,
    event_tx: &broadcast::Sender<JobEvent>,
) -> Result<u64, StoreError> {
    let now = Utc::now();
    // A retention reaching past the earliest representable time keeps everything.
    let cutoff = chrono::Duration::try_days(i64::from(retention_days))
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let deleted = store.delete_older_than(&CLEANUP_STATUSES, cutoff).await?
        + fast_store.delete_older_than(&CLEANUP_STATUSES, cutoff).await?;

    if deleted > 0 {
        tracing::info!(deleted, retention_days, "Cleaned up old jobs");
        let _ = event_tx.send(JobEvent::JobsCleanedUp {
            deleted,
            timestamp: now,
        });
    }
    Ok(deleted)
}

/// Sweeper actor arguments.
pub struct SweeperArgs<S> {
    pub store: Arc<S>,
    pub fast_store: Arc<MemoryJobStore>,
    pub retention_days: u32,
    pub interval: Duration,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the sweeper actor.
pub struct SweeperState<S> {
    args: SweeperArgs<S>,
    ticker: Option<JoinHandle<()>>,
}

/// Runs [`sweep`] every `interval`, first after one full interval.
pub struct CleanupSweeper<S>(PhantomData<fn() -> S>);

impl<S> CleanupSweeper<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for CleanupSweeper<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for CleanupSweeper<S> {
    type Msg = SweeperMessage;
    type State = SweeperState<S>;
    type Arguments = SweeperArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        if args.interval.is_zero() {
            return Err("cleanup interval must be positive".into());
        }
        tracing::info!(
            "Starting cleanup sweeper: every {:?}, retention {} days",
            args.interval,
            args.retention_days
        );

        let period = args.interval;
        let ticker = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if myself.send_message(SweeperMessage::Sweep).is_err() {
                    break;
                }
            }
        });

        Ok(SweeperState {
            args,
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
            SweeperMessage::Sweep => {
                let args = &state.args;
                if let Err(e) = sweep(
                    args.store.as_ref(),
                    &args.fast_store,
                    args.retention_days,
                    &args.event_tx,
                )
                .await
                {
                    tracing::error!(operation = "cleanup", "Cleanup sweep failed: {}", e);
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
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        Ok(())
    }
}
