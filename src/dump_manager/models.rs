use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dump_registry::{DumpRecord, DumpStatus};

/// Whoever is calling into the dump manager, with the rights they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    rights: HashSet<String>,
}

impl Actor {
    pub fn new<I, S>(name: impl Into<String>, rights: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            rights: rights.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_right(&self, right: &str) -> bool {
        self.rights.contains(right)
    }
}

/// Body of an enqueue request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateDumpRequest {
    #[serde(rename = "type")]
    pub dump_type: String,
    /// Extra flags passed verbatim.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Value paired with every flag in the profile's `generate.arguments`.
    #[serde(default)]
    pub parameter: Option<String>,
}

/// One row of the dump listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpListing {
    pub filename: String,
    /// Download path when completed, the bare filename otherwise.
    pub link: String,
    pub time: i64,
    #[serde(rename = "type")]
    pub dump_type: String,
    pub status: DumpStatus,
    pub size: u64,
}

impl DumpListing {
    pub fn from_record(record: DumpRecord) -> Self {
        let link = if record.status == DumpStatus::Completed {
            download_path(&record.filename)
        } else {
            record.filename.clone()
        };
        Self {
            link,
            time: record.timestamp,
            filename: record.filename,
            dump_type: record.dump_type,
            status: record.status,
            size: record.size,
        }
    }
}

pub fn download_path(filename: &str) -> String {
    format!("/v1/dumps/{}/download", filename)
}

/// What to stream for a download: one key, or every chunk in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub filename: String,
    pub keys: Vec<String>,
    pub chunked: bool,
}
