//! Message types for actor communication.

use queue_core::Job;
use ractor::{ActorRef, RpcReplyPort};

/// Messages for the DispatcherActor.
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Claim and dispatch eligible jobs. Sent by the poll ticker, and by the
    /// manager when a fast-tier job is added.
    Poll,

    /// A worker finished its jobs and can take more.
    WorkerIdle { worker: ActorRef<WorkerMessage> },

    /// Stop claiming new jobs. Already claimed jobs still get dispatched.
    StopClaiming { reply: RpcReplyPort<()> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run claimed jobs. More than one job means a handler batch; all jobs in
    /// a batch share a job type.
    Process { jobs: Vec<Job> },
}

/// Messages for the CleanupSweeper.
#[derive(Debug)]
pub enum SweeperMessage {
    /// Delete old terminal jobs from both tiers.
    Sweep,
}
