//! Maintenance tasks run on a schedule inside the server.

pub mod quota_enforcement;
pub mod registry_backfill;
pub mod unknown_type_cleanup;

pub use quota_enforcement::QuotaEnforcementJob;
pub use registry_backfill::RegistryBackfillJob;
pub use unknown_type_cleanup::UnknownTypeCleanupJob;

use crate::background_jobs::job::JobError;
use crate::maintenance::{MaintenanceError, MaintenanceReport};

/// Map a maintenance run onto the job result.
///
/// Per-dump failures are logged by the task and fail the job so they show
/// up in the execution metrics.
fn report_to_result(
    result: Result<MaintenanceReport, MaintenanceError>,
) -> Result<MaintenanceReport, JobError> {
    match result {
        Ok(report) if report.is_success() => Ok(report),
        Ok(report) => Err(JobError::ExecutionFailed(report.failures.join("; "))),
        Err(MaintenanceError::AlreadyRunning(_)) => Err(JobError::AlreadyRunning),
        Err(e) => Err(JobError::ExecutionFailed(e.to_string())),
    }
}
