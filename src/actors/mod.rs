//! Actor-based job orchestration
//!
//! Each job runs as an independent tokio task; the scheduler is one more task that owns
//! the clock and talks to jobs only through their handles.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │    Scheduler     │ ◄── SchedulerCommand (TickNow, ListJobs, Shutdown)
//!                 └────────┬─────────┘
//!                          │ tick(clock), one slot per job
//!            ┌─────────────┼─────────────┐
//!            │             │             │
//!     ┌──────▼──────┐      │      ┌──────▼──────┐
//!     │    Job-1    │      │      │    Job-N    │
//!     │  (module)   │      │      │  (module)   │
//!     └──────┬──────┘      │      └──────┬──────┘
//!            │             │             │
//!            └─────────────┼─────────────┘
//!                          │ one write_chunk per tick
//!                 ┌────────▼─────────┐
//!                 │      Output      │
//!                 └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Ticks**: non-blocking, dropped when the job is still busy
//! 2. **Exits**: a job reports why it stopped over an mpsc channel
//! 3. **Request/Response**: oneshot channels for scheduler queries
//! 4. **Shutdown**: a cancellation token per job, children of the scheduler's token

pub mod job;
pub mod messages;
pub mod scheduler;
