use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub dumps_dir: Option<String>,
    pub temp_dir: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,

    // Feature configs
    pub data_dump: Option<DataDumpConfig>,
    pub actors: Vec<ActorConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DataDumpConfig {
    pub db_name: Option<String>,
    pub disable_generate: Option<bool>,
    pub allow_retries: Option<bool>,
    pub max_retries: Option<u32>,
    pub stale_after_hours: Option<u64>,
    /// Program (plus leading arguments) used to run `mwscript` profiles.
    pub maintenance_runner: Option<Vec<String>>,
    /// Interval of the in-server maintenance jobs. 0 disables them.
    pub maintenance_interval_hours: Option<u64>,
    pub limits: Option<LimitsConfig>,
    pub types: BTreeMap<String, DumpTypeConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub cpu_secs: Option<u64>,
    pub memory_kb: Option<u64>,
    pub filesize_kb: Option<u64>,
    pub wall_clock_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DumpTypeConfig {
    pub permissions: Option<PermissionsConfig>,
    pub file_ending: Option<String>,
    pub limit: Option<i64>,
    pub generate: Option<GenerateConfig>,
    pub use_backend_temp_store: Option<bool>,
    pub start_chunk_size: Option<SizeValue>,
    pub chunk_size: Option<SizeValue>,
    /// TOML keys are strings; parsed to exit codes when resolving.
    pub log_failed_exit_code_comments: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PermissionsConfig {
    pub generate: Option<String>,
    pub view: Option<String>,
    pub delete: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GenerateConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub script: Option<String>,
    pub options: Vec<String>,
    pub arguments: Vec<String>,
}

/// A byte size written either as an integer or as a human string ("100 MiB").
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

impl SizeValue {
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            SizeValue::Bytes(b) => Ok(*b),
            SizeValue::Text(s) => Ok(byte_unit::Byte::parse_str(s, true)
                .with_context(|| format!("Invalid size: {:?}", s))?
                .as_u64()),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ActorConfig {
    pub name: String,
    /// Bearer token identifying this actor on the HTTP API.
    pub token: String,
    pub rights: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
