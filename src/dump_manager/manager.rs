//! The narrow interface callers use to request, list, download and delete
//! dumps.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::chunked_storage::ChunkedStorage;
use crate::config::{DumpSettings, DEFAULT_VIEW_RIGHT};
use crate::dump_registry::{AuditLogger, DumpFilter, DumpRecord, DumpRegistry};
use crate::job_queue::{DumpJob, GenerateRequest, JobSink};
use crate::server::metrics;

use super::error::{DumpError, DumpResult};
use super::models::*;

/// Build a fresh dump filename: `{db_name}_{type}_{20 hex chars}{ending}`.
pub fn make_filename(db_name: &str, dump_type: &str, file_ending: &str) -> String {
    let bytes: [u8; 10] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}_{}{}", db_name, dump_type, hex, file_ending)
}

/// Filenames that can safely name a blob.
fn is_valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains('/')
        && !filename.contains('\\')
}

/// Main dump manager.
///
/// Every method is blocking; the registry and store calls are quick except
/// for deletes of heavily chunked dumps.
pub struct DumpManager {
    settings: Arc<DumpSettings>,
    registry: Arc<dyn DumpRegistry>,
    storage: Arc<ChunkedStorage>,
    audit_logger: AuditLogger,
    jobs: Arc<dyn JobSink>,
}

impl DumpManager {
    pub fn new(
        settings: Arc<DumpSettings>,
        registry: Arc<dyn DumpRegistry>,
        storage: Arc<ChunkedStorage>,
        jobs: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            audit_logger: AuditLogger::new(registry.clone()),
            settings,
            registry,
            storage,
            jobs,
        }
    }

    pub fn settings(&self) -> &DumpSettings {
        &self.settings
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Request a new dump.
    ///
    /// Returns the filename of the queued dump, or `None` when generation is
    /// disabled or the type is at its quota.
    pub fn generate(&self, actor: &Actor, request: &GenerateDumpRequest) -> DumpResult<Option<String>> {
        let dump_type = request.dump_type.as_str();
        if self.settings.disable_generate {
            info!("Dump generation is disabled, ignoring request for {}", dump_type);
            metrics::record_request(dump_type, "disabled");
            return Ok(None);
        }

        let profile = self
            .settings
            .profile(dump_type)
            .ok_or_else(|| DumpError::InvalidType(dump_type.to_string()))?;
        if !actor.has_right(&profile.permissions.generate) {
            return Err(DumpError::PermissionDenied);
        }

        if profile.has_quota() && self.registry.count_by_type(dump_type)? as i64 >= profile.limit {
            info!(
                "Dump type {} is at its limit of {}, declining request from {}",
                dump_type, profile.limit, actor.name
            );
            metrics::record_request(dump_type, "over_quota");
            return Ok(None);
        }

        let mut arguments = request.arguments.clone();
        if let Some(value) = &request.parameter {
            arguments.extend(profile.expand_arguments(value));
        }

        let filename = make_filename(&self.settings.db_name, dump_type, &profile.file_ending);
        let record = DumpRecord::new_queued(&filename, dump_type, chrono::Utc::now().timestamp());
        self.registry.insert(&record)?;
        // Audited before queueing so it precedes the worker's entries
        self.audit_logger
            .log_generate_requested(&actor.name, &filename)?;

        self.jobs
            .push(DumpJob::Generate(GenerateRequest {
                dump_type: dump_type.to_string(),
                filename: filename.clone(),
                arguments,
            }))
            .map_err(|e| DumpError::Internal(e.into()))?;

        info!("Queued {} dump {} for {}", dump_type, filename, actor.name);
        metrics::record_request(dump_type, "queued");
        Ok(Some(filename))
    }

    // =========================================================================
    // Listing & download
    // =========================================================================

    /// Dumps matching `filter` whose type the actor may view, newest first.
    pub fn list(&self, actor: &Actor, filter: &DumpFilter) -> DumpResult<Vec<DumpListing>> {
        let records = self.registry.list(filter)?;
        Ok(records
            .into_iter()
            .filter(|record| actor.has_right(self.view_right(&record.dump_type)))
            .map(DumpListing::from_record)
            .collect())
    }

    fn view_right(&self, dump_type: &str) -> &str {
        self.settings
            .profile(dump_type)
            .map(|p| p.permissions.view.as_str())
            .unwrap_or(DEFAULT_VIEW_RIGHT)
    }

    /// Resolve the blobs to stream for `filename`.
    pub fn open_download(&self, actor: &Actor, filename: &str) -> DumpResult<DownloadPlan> {
        if !is_valid_filename(filename) {
            return Err(DumpError::NotFound(filename.to_string()));
        }
        let view_right = match self.registry.get(filename)? {
            Some(record) => self.view_right(&record.dump_type).to_string(),
            None => DEFAULT_VIEW_RIGHT.to_string(),
        };
        if !actor.has_right(&view_right) {
            return Err(DumpError::PermissionDenied);
        }

        let keys = self
            .storage
            .open_parts(filename)
            .map_err(|e| DumpError::Internal(e.into()))?;
        if keys.is_empty() {
            return Err(DumpError::NotFound(filename.to_string()));
        }
        let single = self.storage.key(filename);
        let chunked = !(keys.len() == 1 && keys[0] == single);
        Ok(DownloadPlan {
            filename: filename.to_string(),
            keys,
            chunked,
        })
    }

    pub fn storage(&self) -> &Arc<ChunkedStorage> {
        &self.storage
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete a dump: every blob first, then the registry row.
    ///
    /// A failing blob delete leaves the row in place.
    pub fn delete(&self, actor: &Actor, dump_type: &str, filename: &str) -> DumpResult<()> {
        let profile = self
            .settings
            .profile(dump_type)
            .ok_or_else(|| DumpError::InvalidType(dump_type.to_string()))?;
        if !actor.has_right(&profile.permissions.delete) {
            return Err(DumpError::PermissionDenied);
        }
        if !is_valid_filename(filename) {
            return Err(DumpError::NotFound(filename.to_string()));
        }

        let record = self
            .registry
            .get(filename)?
            .filter(|record| record.dump_type == dump_type)
            .ok_or_else(|| DumpError::NotFound(filename.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        if !record.is_deletable(now, self.settings.stale_after_secs) {
            warn!(
                "Refusing to delete {} dump {} while {}",
                dump_type, filename, record.status
            );
            return Err(DumpError::NotDeletable(filename.to_string()));
        }

        if let Err(e) = self.storage.delete_all(filename) {
            error!("Failed to delete blobs of {}: {}", filename, e);
            return Err(DumpError::DeleteFailed(filename.to_string()));
        }
        self.registry.delete(filename)?;
        self.audit_logger.log_deleted(&actor.name, filename)?;

        info!("Deleted {} dump {} for {}", dump_type, filename, actor.name);
        metrics::record_deletion("request");
        Ok(())
    }
}
