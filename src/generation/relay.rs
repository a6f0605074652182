use std::sync::Arc;

use anyhow::{bail, Result};

use super::status::StatusManager;
use crate::dump_registry::{DumpRegistry, DumpStatus};
use crate::job_queue::StatusUpdate;
use crate::server::metrics;

/// Applies status updates handed off by the generation worker.
///
/// Runs as its own job so that a registry outage while an export is running
/// only delays the final write instead of failing the export.
pub struct StatusUpdateRelay {
    status: Arc<StatusManager>,
    registry: Arc<dyn DumpRegistry>,
}

impl StatusUpdateRelay {
    pub fn new(status: Arc<StatusManager>, registry: Arc<dyn DumpRegistry>) -> Self {
        Self { status, registry }
    }

    pub fn apply(&self, update: &StatusUpdate) -> Result<()> {
        if update.status == DumpStatus::Queued {
            bail!("Cannot relay status queued for {}", update.filename);
        }
        let dump_type = self
            .registry
            .get(&update.filename)?
            .map(|record| record.dump_type);

        let applied = self.status.set_status(
            update.status,
            &update.filename,
            &update.comment,
            update.file_size,
        )?;

        if applied && update.status.is_terminal() {
            if let Some(dump_type) = dump_type {
                metrics::record_generation(&dump_type, update.status.as_str());
            }
        }
        Ok(())
    }
}
