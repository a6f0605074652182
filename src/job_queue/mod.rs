//! At-least-once job queue for dump generation and status updates, persisted
//! in the registry database.

mod models;
mod processor;
mod queue;
mod retry_policy;
mod store;

pub use models::{DumpJob, GenerateRequest, StatusUpdate};
pub use processor::{JobHandler, JobProcessor, JobProcessorHandle};
pub use queue::{JobQueue, JobReceiver, JobSink, QueueError, QueuedJob};
pub use retry_policy::RetryPolicy;
pub use store::{JobStore, SqliteJobStore, StoredJob};

#[cfg(test)]
pub use queue::recording::RecordingSink;
