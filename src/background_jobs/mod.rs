//! Background job scheduling and execution.
//!
//! Jobs are synchronous and run on tokio's blocking pool. The scheduler fires
//! them on startup and at fixed intervals until its shutdown token is
//! cancelled.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{run_job_now, JobScheduler};
