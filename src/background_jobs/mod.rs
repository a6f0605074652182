//! Background job scheduling and execution.
//!
//! Runs the retention and consistency maintenance tasks periodically inside
//! the server process.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::JobScheduler;
