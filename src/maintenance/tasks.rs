use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::chunked_storage::{BlobGroup, ChunkedStorage};
use crate::config::DumpSettings;
use crate::dump_registry::{
    AuditLogger, DumpRecord, DumpRegistry, DumpStatus, SqliteDumpRegistry, MAINTENANCE_ACTOR,
};
use crate::server::metrics;

use super::lock::MaintenanceLock;
use super::MaintenanceResult;

/// Type recorded for backfilled dumps whose ending matches no profile.
pub const UNKNOWN_DUMP_TYPE: &str = "unknown";

/// What a maintenance run did, or would have done on a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub dry_run: bool,
    /// Dumps deleted (or that would be).
    pub removed: Vec<String>,
    /// Dumps inserted into the registry (or that would be).
    pub imported: Vec<String>,
    /// Dumps that could not be processed, with the reason.
    pub failures: Vec<String>,
    pub migrated_rows: usize,
}

impl MaintenanceReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Guess the dump type of a blob from its name.
///
/// Everything after the first `.` of the name, with the dot, is compared to
/// each profile's `file_ending`.
pub fn infer_dump_type(settings: &DumpSettings, base_name: &str) -> String {
    let Some(dot) = base_name.find('.') else {
        return UNKNOWN_DUMP_TYPE.to_string();
    };
    let ending = &base_name[dot..];
    settings
        .profiles
        .values()
        .find(|profile| !profile.file_ending.is_empty() && profile.file_ending == ending)
        .map(|profile| profile.name.clone())
        .unwrap_or_else(|| UNKNOWN_DUMP_TYPE.to_string())
}

/// Maintenance tasks over one registry and store.
///
/// Every task holds the [`MaintenanceLock`] in `lock_dir` while it runs.
pub struct Maintenance {
    settings: Arc<DumpSettings>,
    registry: Arc<dyn DumpRegistry>,
    storage: Arc<ChunkedStorage>,
    audit_logger: AuditLogger,
    lock_dir: PathBuf,
}

impl Maintenance {
    pub fn new(
        settings: Arc<DumpSettings>,
        registry: Arc<dyn DumpRegistry>,
        storage: Arc<ChunkedStorage>,
        lock_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            audit_logger: AuditLogger::new(registry.clone()),
            settings,
            registry,
            storage,
            lock_dir: lock_dir.into(),
        }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Delete the oldest dumps of every type over its quota.
    ///
    /// A failing blob delete stops the type it belongs to; other types are
    /// still processed.
    pub fn enforce_quota(&self, dry_run: bool) -> MaintenanceResult<MaintenanceReport> {
        let _lock = MaintenanceLock::acquire(&self.lock_dir, "delete-old-dumps")?;
        let mut report = MaintenanceReport::new(dry_run);

        for profile in self.settings.profiles.values() {
            if !profile.has_quota() {
                continue;
            }
            let limit = profile.limit as usize;
            let count = self.registry.count_by_type(&profile.name)?;
            if count <= limit {
                continue;
            }
            info!(
                "{} dumps of type {} over the limit of {}",
                count - limit,
                profile.name,
                limit
            );

            if dry_run {
                for record in self.registry.oldest_n_by_type(&profile.name, count - limit)? {
                    info!("Would delete dump {}", record.filename);
                    report.removed.push(record.filename);
                }
                continue;
            }

            while self.registry.count_by_type(&profile.name)? > limit {
                let Some(oldest) = self.registry.oldest_by_type(&profile.name)? else {
                    break;
                };
                match self.remove_dump(&oldest.filename, "quota") {
                    Ok(()) => report.removed.push(oldest.filename),
                    Err(e) => {
                        error!("Failed to delete {}: {}", oldest.filename, e);
                        report.failures.push(format!("{}: {}", oldest.filename, e));
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Delete every dump whose type is no longer configured.
    pub fn delete_unknown_types(&self, dry_run: bool) -> MaintenanceResult<MaintenanceReport> {
        let _lock = MaintenanceLock::acquire(&self.lock_dir, "delete-unknown-dumps")?;
        let mut report = MaintenanceReport::new(dry_run);

        for dump_type in self.registry.distinct_types()? {
            if self.settings.profile(&dump_type).is_some() {
                continue;
            }
            for record in self.registry.list_by_type(&dump_type)? {
                if dry_run {
                    info!(
                        "Would delete dump with filename {} and type {}",
                        record.filename, record.dump_type
                    );
                    report.removed.push(record.filename);
                    continue;
                }
                match self.remove_dump(&record.filename, "unknown_type") {
                    Ok(()) => report.removed.push(record.filename),
                    Err(e) => {
                        error!("Failed to delete {}: {}", record.filename, e);
                        report.failures.push(format!("{}: {}", record.filename, e));
                    }
                }
            }
        }

        info!("Removed {} dumps of unknown types", report.removed.len());
        Ok(report)
    }

    /// Register dumps found in the store but missing from the registry.
    pub fn import_missing(&self, dry_run: bool) -> MaintenanceResult<MaintenanceReport> {
        let _lock = MaintenanceLock::acquire(&self.lock_dir, "import-missing-dumps")?;
        let mut report = MaintenanceReport::new(dry_run);

        let names = self.storage.blob_store().list(self.storage.container())?;
        let known: HashSet<String> = self.registry.all_filenames()?.into_iter().collect();

        for group in ChunkedStorage::group_parts(&names) {
            if known.contains(&group.base) {
                continue;
            }
            let record = match self.backfill_record(&group) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping {}: {}", group.base, e);
                    report.failures.push(format!("{}: {}", group.base, e));
                    continue;
                }
            };

            if dry_run {
                info!(
                    "Would import dump {} of type {} ({} bytes)",
                    record.filename, record.dump_type, record.size
                );
            } else {
                self.registry.insert(&record)?;
                info!(
                    "Imported dump {} of type {} ({} bytes)",
                    record.filename, record.dump_type, record.size
                );
            }
            report.imported.push(record.filename);
        }

        Ok(report)
    }

    /// Convert a legacy registry file to the single status column.
    ///
    /// Runs before any registry is opened on `db_path`, so it only needs the
    /// lock directory.
    pub fn migrate_legacy_status(lock_dir: &Path, db_path: &Path) -> MaintenanceResult<MaintenanceReport> {
        let _lock = MaintenanceLock::acquire(lock_dir, "migrate-status")?;
        let mut report = MaintenanceReport::new(false);
        report.migrated_rows = SqliteDumpRegistry::migrate_legacy_file(db_path)?;
        info!("Migrated {} legacy rows in {:?}", report.migrated_rows, db_path);
        Ok(report)
    }

    fn backfill_record(&self, group: &BlobGroup) -> MaintenanceResult<DumpRecord> {
        let mut size = 0;
        let mut modified = 0;
        for member in &group.members {
            let key = self.storage.key(member);
            let stat = self.storage.blob_store().stat(&key)?.ok_or_else(|| {
                anyhow::anyhow!("Blob {} disappeared while importing", key)
            })?;
            size += stat.size;
            modified = stat.modified;
        }
        Ok(DumpRecord {
            filename: group.base.clone(),
            dump_type: infer_dump_type(&self.settings, &group.base),
            status: DumpStatus::Completed,
            size,
            timestamp: modified,
        })
    }

    fn remove_dump(&self, filename: &str, reason: &str) -> MaintenanceResult<()> {
        self.storage.delete_all(filename)?;
        self.registry.delete(filename)?;
        if let Err(e) = self.audit_logger.log_deleted(MAINTENANCE_ACTOR, filename) {
            warn!("Failed to audit deletion of {}: {}", filename, e);
        }
        metrics::record_deletion(reason);
        info!("Deleted dump {} ({})", filename, reason);
        Ok(())
    }
}
