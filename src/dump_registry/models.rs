//! Data models for the dump registry.
//!
//! Defines dump records, their status lifecycle and audit log entries.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a dump.
///
/// Progresses `Queued -> InProgress -> Completed | Failed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpStatus {
    Queued,
    InProgress,
    Completed, // terminal
    Failed,    // terminal
}

impl DumpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpStatus::Queued => "queued",
            DumpStatus::InProgress => "in-progress",
            DumpStatus::Completed => "completed",
            DumpStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DumpStatus::Queued),
            "in-progress" => Some(DumpStatus::InProgress),
            "completed" => Some(DumpStatus::Completed),
            "failed" => Some(DumpStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, DumpStatus::Completed | DumpStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a forward step.
    ///
    /// `Queued -> Failed` is allowed for dumps whose generation could not
    /// even start.
    pub fn can_transition_to(&self, next: DumpStatus) -> bool {
        matches!(
            (self, next),
            (DumpStatus::Queued, DumpStatus::InProgress)
                | (DumpStatus::Queued, DumpStatus::Failed)
                | (DumpStatus::InProgress, DumpStatus::Completed)
                | (DumpStatus::InProgress, DumpStatus::Failed)
        )
    }
}

impl std::fmt::Display for DumpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub filename: String,
    pub dump_type: String,
    pub status: DumpStatus,
    /// Bytes, 0 until completed.
    pub size: u64,
    /// Unix seconds, set at enqueue.
    pub timestamp: i64,
}

impl DumpRecord {
    pub fn new_queued(filename: impl Into<String>, dump_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            filename: filename.into(),
            dump_type: dump_type.into(),
            status: DumpStatus::Queued,
            size: 0,
            timestamp,
        }
    }

    /// A dump may be deleted once terminal, or once it has been stuck
    /// queued/in-progress for longer than `grace_secs`.
    pub fn is_deletable(&self, now: i64, grace_secs: i64) -> bool {
        self.status.is_terminal() || now - self.timestamp > grace_secs
    }
}

/// Filter for listing dumps. Every set field must match exactly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DumpFilter {
    #[serde(rename = "type")]
    pub dump_type: Option<String>,
    pub filename: Option<String>,
    pub timestamp: Option<i64>,
}

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Generate,
    GenerateInProgress,
    GenerateCompleted,
    GenerateFailed,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Generate => "generate",
            AuditAction::GenerateInProgress => "generate-in-progress",
            AuditAction::GenerateCompleted => "generate-completed",
            AuditAction::GenerateFailed => "generate-failed",
            AuditAction::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "generate" => Some(AuditAction::Generate),
            "generate-in-progress" => Some(AuditAction::GenerateInProgress),
            "generate-completed" => Some(AuditAction::GenerateCompleted),
            "generate-failed" => Some(AuditAction::GenerateFailed),
            "delete" => Some(AuditAction::Delete),
            _ => None,
        }
    }

    /// The audit action recorded for a generation status transition.
    pub fn for_status(status: DumpStatus) -> Option<Self> {
        match status {
            DumpStatus::Queued => None,
            DumpStatus::InProgress => Some(AuditAction::GenerateInProgress),
            DumpStatus::Completed => Some(AuditAction::GenerateCompleted),
            DumpStatus::Failed => Some(AuditAction::GenerateFailed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub timestamp: i64,
    pub action: AuditAction,
    pub performer: String,
    pub filename: Option<String>,
    pub comment: Option<String>,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction, performer: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: chrono::Utc::now().timestamp(),
            action,
            performer: performer.into(),
            filename: None,
            comment: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        if !comment.is_empty() {
            self.comment = Some(comment);
        }
        self
    }
}
