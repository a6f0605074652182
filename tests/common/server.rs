//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own registry, blob store and
//! dump workers running real `sh` exports.

use super::constants::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiki_dumps_server::blob_store::FsBlobStore;
use wiki_dumps_server::chunked_storage::ChunkedStorage;
use wiki_dumps_server::config::{ActorConfig, DumpProfile, DumpSettings};
use wiki_dumps_server::dump_manager::DumpManager;
use wiki_dumps_server::dump_registry::SqliteDumpRegistry;
use wiki_dumps_server::generation::{
    DumpJobHandler, DumpWorker, ShellCommandRunner, StatusManager, StatusUpdateRelay,
};
use wiki_dumps_server::job_queue::{JobProcessor, JobQueue, SqliteJobStore};
use wiki_dumps_server::maintenance::Maintenance;
use wiki_dumps_server::server::{make_app, ActorDirectory, RequestsLoggingLevel, ServerConfig};

/// Bytes written by the test exports: `yes dumpline` cut at `size`.
pub fn expected_export_bytes(size: u64) -> Vec<u8> {
    b"dumpline\n"
        .iter()
        .copied()
        .cycle()
        .take(size as usize)
        .collect()
}

fn shell_export(name: &str, ending: &str, script: String) -> DumpProfile {
    let mut profile = DumpProfile::shell(name, "sh", &["-c", &script]);
    profile.file_ending = ending.to_string();
    profile
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display())
}

/// Test server instance with isolated registry, store and workers
///
/// When dropped, the server and its workers shut down and temp resources are
/// cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Registry for direct database access in tests
    pub registry: Arc<SqliteDumpRegistry>,

    /// Storage for direct blob access in tests
    pub storage: Arc<ChunkedStorage>,

    pub settings: Arc<DumpSettings>,

    /// Root of the blob store
    pub dumps_dir: PathBuf,

    /// Scratch directory of the temp-store exports
    pub temp_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_root: TempDir,
    shutdown: CancellationToken,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// Profiles:
    /// - `LIMITED_TYPE` exports straight into the store, at most
    ///   `LIMITED_TYPE_LIMIT` dumps
    /// - `SMALL_TYPE` and `CHUNKED_TYPE` export to the temp store, below and
    ///   above the chunking threshold
    /// - `FAILING_TYPE` always exits with `FAILING_EXIT_CODE`
    ///
    /// # Panics
    ///
    /// Panics if any resource cannot be created or the server doesn't become
    /// ready within timeout.
    pub async fn spawn() -> Self {
        let temp_root = TempDir::new().expect("Failed to create temp dir");
        let db_dir = temp_root.path().join("db");
        let dumps_dir = temp_root.path().join("dumps");
        let temp_dir = temp_root.path().join("tmp");
        for dir in [&db_dir, &dumps_dir, &temp_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        let fs_store = Arc::new(FsBlobStore::new(&dumps_dir).expect("Failed to open blob store"));
        let storage = Arc::new(ChunkedStorage::new(fs_store.clone()));
        storage
            .prepare_container()
            .expect("Failed to prepare container");

        // Direct exports write where the store expects the blob
        let direct_target = fs_store
            .path_of(&storage.key("${filename}"))
            .expect("Failed to resolve blob path");
        let temp_target = temp_dir.join("${filename}");

        let mut limited = shell_export(
            LIMITED_TYPE,
            ".xml.gz",
            format!(
                "yes dumpline | head -c {} > {}",
                SMALL_EXPORT_SIZE,
                quote(&direct_target)
            ),
        );
        limited.limit = LIMITED_TYPE_LIMIT;

        let mut small = shell_export(
            SMALL_TYPE,
            ".html.gz",
            format!(
                "yes dumpline | head -c {} > {}",
                SMALL_EXPORT_SIZE,
                quote(&temp_target)
            ),
        );
        small.use_backend_temp_store = true;
        small.start_chunk_size = START_CHUNK_SIZE;
        small.chunk_size = CHUNK_SIZE;

        let mut chunked = shell_export(
            CHUNKED_TYPE,
            ".tar.gz",
            format!(
                "yes dumpline | head -c {} > {}",
                LARGE_EXPORT_SIZE,
                quote(&temp_target)
            ),
        );
        chunked.use_backend_temp_store = true;
        chunked.start_chunk_size = START_CHUNK_SIZE;
        chunked.chunk_size = CHUNK_SIZE;

        let mut failing = shell_export(
            FAILING_TYPE,
            ".txt",
            format!(
                "echo partial > {}; exit {}",
                quote(&temp_target),
                FAILING_EXIT_CODE
            ),
        );
        failing.use_backend_temp_store = true;
        failing.log_failed_exit_code_comments =
            HashMap::from([(FAILING_EXIT_CODE, FAILING_EXIT_COMMENT.to_string())]);

        let mut settings = DumpSettings::default()
            .with_profile(limited)
            .with_profile(small)
            .with_profile(chunked)
            .with_profile(failing);
        settings.db_name = TEST_DB_NAME.to_string();
        let settings = Arc::new(settings);

        let registry = Arc::new(
            SqliteDumpRegistry::new(db_dir.join("data_dump.db"))
                .expect("Failed to open dump registry"),
        );

        let shutdown = CancellationToken::new();
        let (queue, receiver) =
            JobQueue::with_store(Arc::new(SqliteJobStore::new(&registry)))
                .expect("Failed to open job queue");
        let jobs = Arc::new(queue.clone());
        let status = Arc::new(StatusManager::new(registry.clone(), &temp_dir));
        let worker = DumpWorker::new(
            settings.clone(),
            status.clone(),
            storage.clone(),
            Arc::new(ShellCommandRunner::new()),
            jobs.clone(),
            &temp_dir,
        );
        let relay = StatusUpdateRelay::new(status, registry.clone());
        let handler = Arc::new(DumpJobHandler::new(worker, relay, false, 0));
        // The handle is dropped; workers stop with the shutdown token
        let _ = JobProcessor::new(handler, queue, receiver, 2).start(shutdown.clone());

        let dump_manager = Arc::new(DumpManager::new(
            settings.clone(),
            registry.clone(),
            storage.clone(),
            jobs,
        ));
        let actors = ActorDirectory::from_configs(&[
            ActorConfig {
                name: ADMIN_ACTOR.to_string(),
                token: ADMIN_TOKEN.to_string(),
                rights: vec![
                    "generate-dump".to_string(),
                    "view-dump".to_string(),
                    "delete-dump".to_string(),
                ],
            },
            ActorConfig {
                name: READER_ACTOR.to_string(),
                token: READER_TOKEN.to_string(),
                rights: vec!["view-dump".to_string()],
            },
        ]);

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let app = make_app(config, dump_manager, actors).expect("Failed to build app");

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            registry,
            storage,
            settings,
            dumps_dir,
            temp_dir,
            _temp_root: temp_root,
            shutdown,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Maintenance over this server's registry and store
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.settings.clone(),
            self.registry.clone(),
            self.storage.clone(),
            &self.dumps_dir,
        )
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    return;
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
