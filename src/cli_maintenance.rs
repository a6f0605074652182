use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;

use cli_style::{get_styles, print_error, print_key_value, print_list, print_success, print_warning};

use wiki_dumps_server::blob_store::FsBlobStore;
use wiki_dumps_server::chunked_storage::ChunkedStorage;
use wiki_dumps_server::config::{AppConfig, CliConfig, FileConfig};
use wiki_dumps_server::dump_registry::SqliteDumpRegistry;
use wiki_dumps_server::maintenance::{Maintenance, MaintenanceError, MaintenanceReport};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles(), about = "Offline maintenance of the dump registry and store")]
struct CliArgs {
    /// Path to the server's TOML config file.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the dump registry database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root directory of the dump blob store.
    #[clap(long, value_parser = parse_path)]
    pub dumps_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deletes the oldest dumps of every type above its configured limit.
    DeleteOldDumps {
        /// Only list what would be deleted.
        #[clap(long)]
        dry_run: bool,
    },

    /// Deletes dumps whose type is no longer configured.
    DeleteUnknownDumps {
        #[clap(long)]
        dry_run: bool,
    },

    /// Adds registry rows for stored dumps the registry does not know about.
    ImportMissingDumps {
        #[clap(long)]
        dry_run: bool,
    },

    /// Converts a registry created with the legacy completed/failed columns.
    MigrateStatus,
}

fn print_report(title: &str, report: &MaintenanceReport) {
    let verb = if report.dry_run { "Would" } else { "Did" };
    print_success(&format!("{} finished{}", title, if report.dry_run { " (dry run)" } else { "" }));
    if !report.removed.is_empty() {
        print_key_value(&format!("{} delete", verb), &report.removed.len().to_string());
        print_list(&report.removed);
    }
    if !report.imported.is_empty() {
        print_key_value(&format!("{} import", verb), &report.imported.len().to_string());
        print_list(&report.imported);
    }
    if report.migrated_rows > 0 {
        print_key_value("Migrated rows", &report.migrated_rows.to_string());
    }
    if report.removed.is_empty() && report.imported.is_empty() && report.migrated_rows == 0 {
        print_key_value("Changes", "none");
    }
    if !report.failures.is_empty() {
        print_warning(&format!("{} failures", report.failures.len()));
        print_list(&report.failures);
    }
}

fn open_maintenance(config: &AppConfig) -> Result<Maintenance> {
    let blob_store = Arc::new(
        FsBlobStore::new(&config.dumps_dir)
            .with_context(|| format!("Failed to open dump store {:?}", config.dumps_dir))?,
    );
    let storage = Arc::new(ChunkedStorage::new(blob_store));
    let registry = Arc::new(SqliteDumpRegistry::new(config.registry_db_path())?);
    Ok(Maintenance::new(
        Arc::new(config.data_dump.clone()),
        registry,
        storage,
        &config.dumps_dir,
    ))
}

fn run(cli_args: CliArgs) -> Result<MaintenanceReport> {
    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        dumps_dir: cli_args.dumps_dir.clone(),
        ..Default::default()
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    let db_path = config.registry_db_path();

    let report = match cli_args.command {
        Command::DeleteOldDumps { dry_run } => open_maintenance(&config)?.enforce_quota(dry_run)?,
        Command::DeleteUnknownDumps { dry_run } => {
            open_maintenance(&config)?.delete_unknown_types(dry_run)?
        }
        Command::ImportMissingDumps { dry_run } => {
            open_maintenance(&config)?.import_missing(dry_run)?
        }
        Command::MigrateStatus => {
            print_key_value("Registry", &db_path.display().to_string());
            Maintenance::migrate_legacy_status(&config.dumps_dir, &db_path)?
        }
    };
    Ok(report)
}

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let title = match &cli_args.command {
        Command::DeleteOldDumps { .. } => "delete-old-dumps",
        Command::DeleteUnknownDumps { .. } => "delete-unknown-dumps",
        Command::ImportMissingDumps { .. } => "import-missing-dumps",
        Command::MigrateStatus => "migrate-status",
    };

    match run(cli_args) {
        Ok(report) => {
            print_report(title, &report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            match err.downcast_ref::<MaintenanceError>() {
                Some(MaintenanceError::AlreadyRunning(holder)) => {
                    print_error(&format!("Another maintenance task is running: {}", holder))
                }
                _ => print_error(&format!("{} failed: {:#}", title, err)),
            }
            ExitCode::FAILURE
        }
    }
}
