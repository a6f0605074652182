use thiserror::Error;

/// Errors surfaced to callers of the dump manager.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Unknown dump type: {0}")]
    InvalidType(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Dump not found: {0}")]
    NotFound(String),

    #[error("Dump {0} is still being generated")]
    NotDeletable(String),

    #[error("Failed to delete dump {0}")]
    DeleteFailed(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type DumpResult<T> = Result<T, DumpError>;
