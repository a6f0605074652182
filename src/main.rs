use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wiki_dumps_server::background_jobs::jobs::{
    QuotaEnforcementJob, RegistryBackfillJob, UnknownTypeCleanupJob,
};
use wiki_dumps_server::background_jobs::{JobContext, JobScheduler};
use wiki_dumps_server::blob_store::FsBlobStore;
use wiki_dumps_server::chunked_storage::ChunkedStorage;
use wiki_dumps_server::config::{AppConfig, CliConfig, FileConfig};
use wiki_dumps_server::dump_manager::DumpManager;
use wiki_dumps_server::dump_registry::SqliteDumpRegistry;
use wiki_dumps_server::generation::{
    DumpJobHandler, DumpWorker, ShellCommandRunner, StatusManager, StatusUpdateRelay,
};
use wiki_dumps_server::job_queue::{JobProcessor, JobQueue, SqliteJobStore};
use wiki_dumps_server::maintenance::Maintenance;
use wiki_dumps_server::server::{self, run_server, ActorDirectory, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override the flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the dump registry database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root directory of the dump blob store. Defaults to `<db-dir>/dumps`.
    #[clap(long, value_parser = parse_path)]
    pub dumps_dir: Option<PathBuf>,

    /// Scratch directory for exports before they are stored.
    #[clap(long, value_parser = parse_path)]
    pub temp_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3002)]
    pub port: u16,

    /// Number of concurrent dump workers.
    #[clap(long, default_value_t = 2)]
    pub workers: usize,

    /// Wiki identifier used in dump filenames.
    #[clap(long)]
    pub db_name: Option<String>,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        dumps_dir: cli_args.dumps_dir.clone(),
        temp_dir: cli_args.temp_dir.clone(),
        port: cli_args.port,
        workers: cli_args.workers,
        db_name: cli_args.db_name.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    info!(
        "Serving dumps of {} with {} configured types",
        config.data_dump.db_name,
        config.data_dump.profiles.len()
    );

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let settings = Arc::new(config.data_dump.clone());

    let blob_store = Arc::new(FsBlobStore::new(&config.dumps_dir)?);
    let storage = Arc::new(ChunkedStorage::new(blob_store));
    storage.prepare_container()?;

    let registry_path = config.registry_db_path();
    info!("Opening dump registry at {:?}...", registry_path);
    let registry = Arc::new(SqliteDumpRegistry::new(&registry_path)?);

    let shutdown = CancellationToken::new();

    // Generation pipeline
    let (queue, receiver) = JobQueue::with_store(Arc::new(SqliteJobStore::new(&registry)))?;
    let jobs = Arc::new(queue.clone());
    let status = Arc::new(StatusManager::new(registry.clone(), &config.temp_dir));
    let worker = DumpWorker::new(
        settings.clone(),
        status.clone(),
        storage.clone(),
        Arc::new(ShellCommandRunner::new()),
        jobs.clone(),
        &config.temp_dir,
    );
    let relay = StatusUpdateRelay::new(status, registry.clone());
    let handler = Arc::new(DumpJobHandler::new(
        worker,
        relay,
        settings.allow_retries,
        settings.max_retries,
    ));
    let processor = JobProcessor::new(handler, queue, receiver, config.workers);
    let processor_handle = processor.start(shutdown.clone());

    // Maintenance jobs
    let scheduler_handle = if settings.maintenance_interval_secs > 0 {
        let interval = Duration::from_secs(settings.maintenance_interval_secs);
        let maintenance = Arc::new(Maintenance::new(
            settings.clone(),
            registry.clone(),
            storage.clone(),
            &config.dumps_dir,
        ));
        let mut scheduler =
            JobScheduler::new(shutdown.clone(), JobContext::new(shutdown.clone(), maintenance));
        scheduler.register_job(Arc::new(QuotaEnforcementJob::new(interval)));
        scheduler.register_job(Arc::new(UnknownTypeCleanupJob::new(interval)));
        scheduler.register_job(Arc::new(RegistryBackfillJob::new(interval)));
        info!(
            "Scheduled {} maintenance jobs every {:?}",
            scheduler.job_count(),
            interval
        );
        Some(tokio::spawn(async move { scheduler.run().await }))
    } else {
        info!("Maintenance jobs disabled");
        None
    };

    let dump_manager = Arc::new(DumpManager::new(
        settings.clone(),
        registry.clone(),
        storage.clone(),
        jobs,
    ));
    let actors = ActorDirectory::from_configs(&config.actors);
    if actors.is_empty() {
        warn!("No actors configured, every dump endpoint will answer 401");
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
        signal_token.cancel();
    });

    let server_config = ServerConfig {
        requests_logging_level: cli_args.logging_level,
        port: config.port,
    };
    let result = run_server(server_config, dump_manager, actors, shutdown.clone()).await;
    shutdown.cancel();

    info!("Waiting for dump workers to finish...");
    processor_handle.join().await;
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!("Job scheduler task failed: {}", e);
        }
    }
    result
}
