//! Message types for actor communication
//!
//! 1. **Ticks**: the scheduler pushes clock values to jobs through a one-slot channel
//! 2. **Exits**: jobs report why they stopped to the scheduler over an mpsc channel
//! 3. **Commands**: request/response messages sent to the scheduler with a oneshot reply

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Run phase of a job, published through a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Uninitialized,
    Initializing,
    /// Auto-detection failed; waiting to retry
    Failed,
    Ready,
    Running,
    /// Gave up after too many failed collections
    Panicked,
    ShuttingDown,
    Stopped,
}

impl JobPhase {
    /// Phases a job never leaves once reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Stopped)
    }
}

/// Result of handing a tick to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDelivery {
    Sent,
    /// The job has not finished its previous tick
    Dropped,
    /// The job is not running (detecting, stopping or gone)
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    DetectionFailed,
    NoCharts,
    RetriesExhausted,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ExitReason::Shutdown => "shutdown",
            ExitReason::DetectionFailed => "auto-detection failed",
            ExitReason::NoCharts => "no charts",
            ExitReason::RetriesExhausted => "retries exhausted",
        };
        f.write_str(reason)
    }
}

/// Event sent by a job when its task ends
#[derive(Debug, Clone)]
pub struct JobExit {
    /// Full name of the job
    pub name: String,
    pub reason: ExitReason,
    pub stopped_at: DateTime<Utc>,
}

/// Commands that can be sent to the Scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Deliver one tick right away, outside the interval timer
    ///
    /// Replies with the clock value that was delivered.
    TickNow { respond_to: oneshot::Sender<u64> },

    ListJobs {
        respond_to: oneshot::Sender<Vec<JobSummary>>,
    },

    /// Stop every job and then the scheduler itself
    Shutdown,
}

/// Point-in-time view of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub name: String,
    pub module: String,
    pub update_every: u32,
    pub phase: JobPhase,
}
