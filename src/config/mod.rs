mod file_config;

pub use file_config::{
    ActorConfig, DataDumpConfig, DumpTypeConfig, FileConfig, GenerateConfig, LimitsConfig,
    PermissionsConfig, SizeValue,
};

use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub const DEFAULT_GENERATE_RIGHT: &str = "generate-dump";
pub const DEFAULT_VIEW_RIGHT: &str = "view-dump";
pub const DEFAULT_DELETE_RIGHT: &str = "delete-dump";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub dumps_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub port: u16,
    pub workers: usize,
    pub db_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    /// Root of the blob store.
    pub dumps_dir: PathBuf,
    /// Scratch space for profiles using the backend temp store.
    pub temp_dir: PathBuf,
    pub port: u16,
    pub workers: usize,

    pub data_dump: DumpSettings,
    pub actors: Vec<ActorConfig>,
}

/// Resource limits applied to export commands. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLimits {
    pub cpu_secs: Option<u64>,
    pub memory_kb: Option<u64>,
    pub filesize_kb: Option<u64>,
    pub wall_clock_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateKind {
    /// `{runner…} {script} {options…} {arguments…} --wiki {db_name}`
    MwScript,
    /// `{script} {options…}`
    Shell,
}

impl GenerateKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mwscript" => Some(GenerateKind::MwScript),
            "shell" | "" => Some(GenerateKind::Shell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCommand {
    pub kind: GenerateKind,
    pub script: String,
    /// May contain `${filename}` placeholders.
    pub options: Vec<String>,
    /// Flags that take a caller-supplied value, passed as `{flag}={value}`.
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePermissions {
    pub generate: String,
    pub view: String,
    pub delete: String,
}

impl Default for ProfilePermissions {
    fn default() -> Self {
        Self {
            generate: DEFAULT_GENERATE_RIGHT.to_string(),
            view: DEFAULT_VIEW_RIGHT.to_string(),
            delete: DEFAULT_DELETE_RIGHT.to_string(),
        }
    }
}

/// A named bundle describing how to generate and store one kind of dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpProfile {
    pub name: String,
    pub permissions: ProfilePermissions,
    pub file_ending: String,
    /// Quota; 0 or less means unlimited.
    pub limit: i64,
    pub generate: GenerateCommand,
    pub use_backend_temp_store: bool,
    pub start_chunk_size: u64,
    pub chunk_size: u64,
    pub log_failed_exit_code_comments: HashMap<i32, String>,
}

impl DumpProfile {
    /// A shell profile with no quota and no chunking.
    pub fn shell(name: &str, script: &str, options: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            permissions: ProfilePermissions::default(),
            file_ending: String::new(),
            limit: 0,
            generate: GenerateCommand {
                kind: GenerateKind::Shell,
                script: script.to_string(),
                options: options.iter().map(|s| s.to_string()).collect(),
                arguments: Vec::new(),
            },
            use_backend_temp_store: false,
            start_chunk_size: 0,
            chunk_size: 0,
            log_failed_exit_code_comments: HashMap::new(),
        }
    }

    /// Pairs every configured argument flag with a caller-supplied value.
    pub fn expand_arguments(&self, value: &str) -> Vec<String> {
        self.generate
            .arguments
            .iter()
            .map(|flag| format!("{}={}", flag, value))
            .collect()
    }

    pub fn has_quota(&self) -> bool {
        self.limit > 0
    }

    /// Comment recorded for a failed export with this exit code.
    pub fn failure_comment(&self, exit_code: i32) -> String {
        match self.log_failed_exit_code_comments.get(&exit_code) {
            Some(comment) if !comment.is_empty() => comment.clone(),
            _ => format!("Something went wrong: Command exited with {}", exit_code),
        }
    }

    fn resolve(name: &str, file: DumpTypeConfig) -> Result<Self> {
        let permissions_file = file.permissions.unwrap_or_default();
        let defaults = ProfilePermissions::default();
        let permissions = ProfilePermissions {
            generate: permissions_file.generate.unwrap_or(defaults.generate),
            view: permissions_file.view.unwrap_or(defaults.view),
            delete: permissions_file.delete.unwrap_or(defaults.delete),
        };

        let generate_file = file
            .generate
            .ok_or_else(|| anyhow!("Dump type {} has no [generate] section", name))?;
        let kind_str = generate_file.kind.unwrap_or_default();
        let kind = GenerateKind::from_str(&kind_str)
            .ok_or_else(|| anyhow!("Dump type {}: unknown generate type {:?}", name, kind_str))?;
        let script = generate_file.script.unwrap_or_default();
        if script.is_empty() {
            bail!("Dump type {}: generate.script must be set", name);
        }

        let start_chunk_size = file
            .start_chunk_size
            .map(|s| s.to_bytes())
            .transpose()
            .with_context(|| format!("Dump type {}: start_chunk_size", name))?
            .unwrap_or(0);
        let chunk_size = file
            .chunk_size
            .map(|s| s.to_bytes())
            .transpose()
            .with_context(|| format!("Dump type {}: chunk_size", name))?
            .unwrap_or(0);

        let mut log_failed_exit_code_comments = HashMap::new();
        for (code, comment) in file.log_failed_exit_code_comments {
            let code: i32 = code
                .trim()
                .parse()
                .with_context(|| format!("Dump type {}: invalid exit code {:?}", name, code))?;
            log_failed_exit_code_comments.insert(code, comment);
        }

        Ok(Self {
            name: name.to_string(),
            permissions,
            file_ending: file.file_ending.unwrap_or_default(),
            limit: file.limit.unwrap_or(0),
            generate: GenerateCommand {
                kind,
                script,
                options: generate_file.options,
                arguments: generate_file.arguments,
            },
            use_backend_temp_store: file.use_backend_temp_store.unwrap_or(false),
            start_chunk_size,
            chunk_size,
            log_failed_exit_code_comments,
        })
    }
}

/// Settings of the dump pipeline.
#[derive(Debug, Clone)]
pub struct DumpSettings {
    /// Wiki identifier, used in filenames and passed as `--wiki`.
    pub db_name: String,
    pub disable_generate: bool,
    pub allow_retries: bool,
    pub max_retries: u32,
    /// Queued/in-progress dumps older than this may be deleted.
    pub stale_after_secs: i64,
    pub maintenance_runner: Vec<String>,
    pub maintenance_interval_secs: u64,
    pub limits: CommandLimits,
    pub profiles: BTreeMap<String, DumpProfile>,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            db_name: "wiki".to_string(),
            disable_generate: false,
            allow_retries: false,
            max_retries: 3,
            stale_after_secs: 48 * 60 * 60,
            maintenance_runner: vec!["php".to_string()],
            maintenance_interval_secs: 24 * 60 * 60,
            limits: CommandLimits::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl DumpSettings {
    pub fn profile(&self, dump_type: &str) -> Option<&DumpProfile> {
        self.profiles.get(dump_type)
    }

    pub fn with_profile(mut self, profile: DumpProfile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    fn resolve(file: DataDumpConfig, cli_db_name: Option<String>) -> Result<Self> {
        let defaults = DumpSettings::default();
        let limits_file = file.limits.unwrap_or_default();

        let mut profiles = BTreeMap::new();
        for (name, type_config) in file.types {
            let profile = DumpProfile::resolve(&name, type_config)?;
            profiles.insert(name, profile);
        }

        Ok(Self {
            db_name: file.db_name.or(cli_db_name).unwrap_or(defaults.db_name),
            disable_generate: file.disable_generate.unwrap_or(defaults.disable_generate),
            allow_retries: file.allow_retries.unwrap_or(defaults.allow_retries),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            stale_after_secs: file
                .stale_after_hours
                .map(|h| (h * 60 * 60) as i64)
                .unwrap_or(defaults.stale_after_secs),
            maintenance_runner: file
                .maintenance_runner
                .filter(|r| !r.is_empty())
                .unwrap_or(defaults.maintenance_runner),
            maintenance_interval_secs: file
                .maintenance_interval_hours
                .map(|h| h * 60 * 60)
                .unwrap_or(defaults.maintenance_interval_secs),
            limits: CommandLimits {
                cpu_secs: limits_file.cpu_secs.filter(|v| *v > 0),
                memory_kb: limits_file.memory_kb.filter(|v| *v > 0),
                filesize_kb: limits_file.filesize_kb.filter(|v| *v > 0),
                wall_clock_secs: limits_file.wall_clock_secs.filter(|v| *v > 0),
            },
            profiles,
        })
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let dumps_dir = file
            .dumps_dir
            .map(PathBuf::from)
            .or_else(|| cli.dumps_dir.clone())
            .unwrap_or_else(|| db_dir.join("dumps"));
        let temp_dir = file
            .temp_dir
            .map(PathBuf::from)
            .or_else(|| cli.temp_dir.clone())
            .unwrap_or_else(std::env::temp_dir);

        let port = file.port.unwrap_or(cli.port);
        let workers = file.workers.unwrap_or(cli.workers).max(1);

        let data_dump =
            DumpSettings::resolve(file.data_dump.unwrap_or_default(), cli.db_name.clone())?;

        for actor in &file.actors {
            if actor.name.is_empty() || actor.token.is_empty() {
                bail!("Every [[actors]] entry needs a name and a token");
            }
        }

        Ok(Self {
            db_dir,
            dumps_dir,
            temp_dir,
            port,
            workers,
            data_dump,
            actors: file.actors,
        })
    }

    pub fn registry_db_path(&self) -> PathBuf {
        self.db_dir.join("data_dump.db")
    }
}
