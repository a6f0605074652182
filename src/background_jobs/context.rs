use crate::maintenance::Maintenance;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Retention and consistency tasks over the registry and store.
    pub maintenance: Arc<Maintenance>,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, maintenance: Arc<Maintenance>) -> Self {
        Self {
            cancellation_token,
            maintenance,
        }
    }

    /// Same resources, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            maintenance: Arc::clone(&self.maintenance),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
