//! Audit logging for dump operations.
//!
//! Provides a higher-level interface over the registry's raw audit log.

use std::sync::Arc;

use anyhow::Result;

use super::models::{AuditAction, AuditLogEntry, DumpStatus};
use super::store::DumpRegistry;

/// Performer recorded for transitions made by the pipeline itself.
pub const MAINTENANCE_ACTOR: &str = "DataDump Maintenance";

/// Helper for logging audit events during dump operations.
pub struct AuditLogger {
    registry: Arc<dyn DumpRegistry>,
}

impl AuditLogger {
    pub fn new(registry: Arc<dyn DumpRegistry>) -> Self {
        Self { registry }
    }

    /// Log a dump request being accepted.
    pub fn log_generate_requested(&self, performer: &str, filename: &str) -> Result<()> {
        self.registry.log_audit_event(
            AuditLogEntry::new(AuditAction::Generate, performer)
                .with_filename(filename)
                .with_comment("Generated dump"),
        )
    }

    /// The audit entry for a generation status transition, attributed to the
    /// maintenance actor. `None` for statuses that are never audited.
    pub fn status_change_entry(
        status: DumpStatus,
        filename: &str,
        comment: &str,
    ) -> Option<AuditLogEntry> {
        let action = AuditAction::for_status(status)?;
        Some(
            AuditLogEntry::new(action, MAINTENANCE_ACTOR)
                .with_filename(filename)
                .with_comment(comment),
        )
    }

    /// Log a dump and its blobs being removed.
    pub fn log_deleted(&self, performer: &str, filename: &str) -> Result<()> {
        self.registry.log_audit_event(
            AuditLogEntry::new(AuditAction::Delete, performer)
                .with_filename(filename)
                .with_comment("Deleted dumps"),
        )
    }
}
