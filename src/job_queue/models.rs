use serde::{Deserialize, Serialize};

use crate::dump_registry::DumpStatus;

/// Request to generate one dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub dump_type: String,
    pub filename: String,
    /// Extra flags appended to `mwscript` invocations.
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// A status transition handed from the worker to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: DumpStatus,
    pub filename: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub file_size: u64,
}

impl StatusUpdate {
    pub fn completed(filename: &str, file_size: u64) -> Self {
        Self {
            status: DumpStatus::Completed,
            filename: filename.to_string(),
            comment: String::new(),
            file_size,
        }
    }

    pub fn failed(filename: &str, comment: impl Into<String>) -> Self {
        Self {
            status: DumpStatus::Failed,
            filename: filename.to_string(),
            comment: comment.into(),
            file_size: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DumpJob {
    Generate(GenerateRequest),
    StatusUpdate(StatusUpdate),
}

impl DumpJob {
    pub fn kind(&self) -> &'static str {
        match self {
            DumpJob::Generate(_) => "generate",
            DumpJob::StatusUpdate(_) => "status_update",
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            DumpJob::Generate(req) => &req.filename,
            DumpJob::StatusUpdate(update) => &update.filename,
        }
    }
}
