use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::chunked_storage::remove_temp_file;
use crate::dump_registry::{AuditLogger, DumpRegistry, DumpStatus};

/// Durable status writes plus their audit trail.
pub struct StatusManager {
    registry: Arc<dyn DumpRegistry>,
    temp_dir: PathBuf,
}

impl StatusManager {
    pub fn new(registry: Arc<dyn DumpRegistry>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn get_status(&self, filename: &str) -> Result<Option<DumpStatus>> {
        self.registry.get_status(filename)
    }

    /// Move `filename` to `status`.
    ///
    /// Terminal statuses also drop any lingering temp export and record the
    /// size. Returns false, writing nothing, when the record is gone, already
    /// has this status, or the move would go backwards.
    pub fn set_status(
        &self,
        status: DumpStatus,
        filename: &str,
        comment: &str,
        file_size: u64,
    ) -> Result<bool> {
        let Some(current) = self.registry.get_status(filename)? else {
            warn!("Cannot set {} on {}: record no longer exists", status, filename);
            return Ok(false);
        };
        if current == status {
            debug!("{} is already {}", filename, status);
            return Ok(false);
        }
        if !current.can_transition_to(status) {
            warn!(
                "Refusing status change of {} from {} to {}",
                filename, current, status
            );
            return Ok(false);
        }

        let size = if status.is_terminal() {
            remove_temp_file(&self.temp_dir.join(filename));
            Some(file_size)
        } else {
            None
        };
        // Status and audit entry land together, so a retried update never
        // finds the status written without its entry
        let entry = AuditLogger::status_change_entry(status, filename, comment);
        if !self
            .registry
            .transition_status(filename, status, size, entry)?
        {
            return Ok(false);
        }
        info!("Dump {} is now {}", filename, status);
        Ok(true)
    }
}
