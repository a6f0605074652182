//! Retention and consistency maintenance of the dump registry and store.

mod lock;
mod tasks;

pub use lock::{MaintenanceLock, LOCK_FILE_NAME};
pub use tasks::{infer_dump_type, Maintenance, MaintenanceReport, UNKNOWN_DUMP_TYPE};

use crate::blob_store::BlobStoreError;

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Another maintenance task is running: {0}")]
    AlreadyRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] BlobStoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;
