//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and JobOptions for work items
//! - QueueConfig and QueueStats for the dispatch tiers
//! - Backoff calculation for retries
//! - Events for real-time updates

pub mod backoff;
mod events;
mod job;
mod queue;

pub use backoff::{BackoffPolicy, backoff_delay};
pub use events::JobEvent;
pub use job::{
    DEFAULT_MAX_ATTEMPTS, Job, JobId, JobOptions, JobStatus, ParseStatusError, Priority, Tier,
};
pub use queue::{ConfigError, FastTierConfig, QueueConfig, QueueStats};
