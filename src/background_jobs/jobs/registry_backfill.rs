//! Registry backfill background job.
//!
//! Registers blobs found in the dumps container that have no registry row,
//! e.g. after restoring the store from a backup.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use std::time::Duration;
use tracing::info;

use super::report_to_result;

pub struct RegistryBackfillJob {
    interval: Duration,
}

impl RegistryBackfillJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackgroundJob for RegistryBackfillJob {
    fn id(&self) -> &'static str {
        "registry_backfill"
    }

    fn name(&self) -> &'static str {
        "Registry Backfill"
    }

    fn description(&self) -> &'static str {
        "Import stored dumps missing from the registry"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = report_to_result(ctx.maintenance.import_missing(false))?;
        if !report.imported.is_empty() {
            info!("Imported {} dumps into the registry", report.imported.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{BlobStore, MemoryBlobStore};
    use crate::chunked_storage::ChunkedStorage;
    use crate::config::DumpSettings;
    use crate::dump_registry::{DumpRegistry, DumpStatus, SqliteDumpRegistry};
    use crate::maintenance::Maintenance;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_runs_on_startup() {
        let job = RegistryBackfillJob::new(Duration::from_secs(60));
        assert!(job.schedule().listens_to(HookEvent::OnStartup));
        assert_eq!(job.schedule().interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_execute_imports_orphans() {
        let lock_dir = TempDir::new().unwrap();
        let registry = Arc::new(SqliteDumpRegistry::in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let storage = Arc::new(ChunkedStorage::new(blobs.clone()));
        blobs.create(&storage.key("w.xml.part0"), b"abc").unwrap();
        blobs.create(&storage.key("w.xml.part1"), b"de").unwrap();
        let maintenance = Arc::new(Maintenance::new(
            Arc::new(DumpSettings::default()),
            registry.clone(),
            storage,
            lock_dir.path(),
        ));
        let ctx = JobContext::new(CancellationToken::new(), maintenance);

        RegistryBackfillJob::new(Duration::from_secs(60))
            .execute(&ctx)
            .unwrap();

        let record = registry.get("w.xml").unwrap().unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.status, DumpStatus::Completed);
    }
}
