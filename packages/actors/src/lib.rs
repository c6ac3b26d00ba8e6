//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based actors that run jobs, and the
//! [`QueueManager`] facade callers use to add and inspect them.
//!
//! # Architecture
//!
//! - `QueueManager` - Routes jobs to a tier, owns the actors below
//! - `DispatcherActor` - Polls one tier's store and claims eligible jobs
//! - `WorkerActor` - Runs a job's handler and records the outcome
//! - `CleanupSweeper` - Deletes old completed and cancelled jobs
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobHandlerRegistry, JobOptions, QueueManager, job_handler};
//!
//! let registry = Arc::new(JobHandlerRegistry::new());
//! registry.register("email", job_handler!(|job| send_email(job.payload).await));
//!
//! let manager = QueueManager::new(Arc::new(repo), registry, QueueConfig::default())?;
//! manager.start().await?;
//! let id = manager.add("email", payload, JobOptions::new()).await?;
//! let report = manager.stop().await?;
//! ```

mod dispatcher;
mod error;
mod handler;
mod limiter;
mod manager;
mod messages;
mod sweeper;
mod worker_actor;

pub use dispatcher::{DispatcherActor, DispatcherArgs, TierSettings};
pub use error::{QueueError, QueueResult};
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, HookFuture, JobHandler, JobHandlerRegistry,
};
pub use limiter::ConcurrencyLimiter;
pub use manager::{QueueManager, ShutdownReport};
pub use messages::{DispatcherMessage, SweeperMessage, WorkerMessage};
pub use sweeper::{CLEANUP_STATUSES, CleanupSweeper, SweeperArgs, sweep};
pub use worker_actor::{WorkerActor, WorkerState};

pub use queue_core::{
    Job, JobEvent, JobId, JobOptions, JobStatus, Priority, QueueConfig, QueueStats, Tier,
};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
