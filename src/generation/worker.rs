//! Drives a single dump from `queued` to a terminal status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use tracing::{error, info, warn};

use super::command::{CommandError, CommandRunner, CommandSpec};
use super::status::StatusManager;
use crate::chunked_storage::{ChunkedStorage, OPEN_ERROR, STORAGE_ERROR};
use crate::config::{DumpProfile, DumpSettings, GenerateKind};
use crate::dump_registry::DumpStatus;
use crate::job_queue::{DumpJob, GenerateRequest, JobSink, StatusUpdate};
use crate::server::metrics;

pub const NOT_EXECUTED_COMMENT: &str = "Command could not be executed";
pub const TIMED_OUT_COMMENT: &str = "Command timed out";

lazy_static! {
    static ref FILENAME_PLACEHOLDER: Regex =
        Regex::new(r"(?i)\$\{filename\}").expect("valid placeholder regex");
}

/// Replace every `${filename}` placeholder, in any case.
pub fn substitute_filename(options: &[String], filename: &str) -> Vec<String> {
    options
        .iter()
        .map(|opt| {
            FILENAME_PLACEHOLDER
                .replace_all(opt, NoExpand(filename))
                .into_owned()
        })
        .collect()
}

pub struct DumpWorker {
    settings: Arc<DumpSettings>,
    status: Arc<StatusManager>,
    storage: Arc<ChunkedStorage>,
    runner: Arc<dyn CommandRunner>,
    jobs: Arc<dyn JobSink>,
    temp_dir: PathBuf,
}

impl DumpWorker {
    pub fn new(
        settings: Arc<DumpSettings>,
        status: Arc<StatusManager>,
        storage: Arc<ChunkedStorage>,
        runner: Arc<dyn CommandRunner>,
        jobs: Arc<dyn JobSink>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            status,
            storage,
            runner,
            jobs,
            temp_dir: temp_dir.into(),
        }
    }

    /// Generate one dump.
    ///
    /// The final status is pushed as a [`DumpJob::StatusUpdate`] and never
    /// written here. Errors are infrastructure failures (registry or queue
    /// unavailable); export failures are reported through the status update.
    pub fn run(&self, request: &GenerateRequest) -> Result<()> {
        let filename = request.filename.as_str();

        match self.status.get_status(filename)? {
            None => {
                info!("Dump {} no longer exists, skipping", filename);
                return Ok(());
            }
            Some(DumpStatus::Completed) => {
                info!("Dump {} is already completed, skipping", filename);
                return Ok(());
            }
            Some(DumpStatus::Failed) => {
                info!("Dump {} already failed, skipping", filename);
                return Ok(());
            }
            Some(DumpStatus::Queued) | Some(DumpStatus::InProgress) => {}
        }

        let Some(profile) = self.settings.profile(&request.dump_type) else {
            warn!(
                "Dump {} has unconfigured type {}",
                filename, request.dump_type
            );
            return self.hand_off(StatusUpdate::failed(
                filename,
                format!("Unknown dump type {}", request.dump_type),
            ));
        };

        self.status
            .set_status(DumpStatus::InProgress, filename, "", 0)
            .with_context(|| format!("Failed to mark {} in progress", filename))?;

        let options = substitute_filename(&profile.generate.options, filename);

        if let Err(e) = self.storage.prepare_container() {
            error!("Failed to prepare dumps container: {}", e);
            return self.hand_off(StatusUpdate::failed(filename, STORAGE_ERROR));
        }

        let spec = self.build_command(profile, options, &request.arguments);
        let started = Instant::now();
        let result = self.runner.run(&spec);
        metrics::record_export_duration(&profile.name, started.elapsed());

        let update = match result {
            Ok(output) if output.exit_code == 0 => self.store_output(profile, filename),
            Ok(output) => {
                warn!(
                    "Export of {} exited with {}",
                    filename, output.exit_code
                );
                StatusUpdate::failed(filename, profile.failure_comment(output.exit_code))
            }
            Err(CommandError::TimedOut(secs)) => {
                warn!("Export of {} timed out after {}s", filename, secs);
                StatusUpdate::failed(filename, TIMED_OUT_COMMENT)
            }
            Err(e) => {
                error!("Export of {} could not run: {}", filename, e);
                StatusUpdate::failed(filename, NOT_EXECUTED_COMMENT)
            }
        };

        self.hand_off(update)
    }

    /// Command line for a profile, with placeholders already substituted.
    pub fn build_command(
        &self,
        profile: &DumpProfile,
        options: Vec<String>,
        arguments: &[String],
    ) -> CommandSpec {
        let generate = &profile.generate;
        let (program, args) = match generate.kind {
            GenerateKind::MwScript => {
                let mut runner = self.settings.maintenance_runner.iter();
                let program = runner.next().cloned().unwrap_or_else(|| "php".to_string());
                let mut args: Vec<String> = runner.cloned().collect();
                args.push(generate.script.clone());
                args.extend(options);
                args.extend(arguments.iter().cloned());
                args.push("--wiki".to_string());
                args.push(self.settings.db_name.clone());
                (program, args)
            }
            GenerateKind::Shell => (generate.script.clone(), options),
        };
        CommandSpec {
            program,
            args,
            limits: self.settings.limits.clone(),
        }
    }

    fn store_output(&self, profile: &DumpProfile, filename: &str) -> StatusUpdate {
        let temp_path = self.temp_dir.join(filename);
        let file_size = if profile.use_backend_temp_store {
            match std::fs::metadata(&temp_path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    error!("Export output {:?} is missing: {}", temp_path, e);
                    return StatusUpdate::failed(filename, OPEN_ERROR);
                }
            }
        } else {
            0
        };

        let outcome = self.storage.store(&temp_path, filename, file_size, profile);
        match outcome.status {
            DumpStatus::Completed => StatusUpdate::completed(filename, outcome.size),
            _ => StatusUpdate::failed(filename, outcome.comment.unwrap_or_default()),
        }
    }

    fn hand_off(&self, update: StatusUpdate) -> Result<()> {
        let filename = update.filename.clone();
        self.jobs
            .push(DumpJob::StatusUpdate(update))
            .with_context(|| format!("Failed to queue status update for {}", filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::dump_registry::{DumpRecord, DumpRegistry, SqliteDumpRegistry};
    use crate::generation::command::fake::FakeCommandRunner;
    use crate::generation::command::CommandOutput;
    use crate::job_queue::RecordingSink;
    use tempfile::TempDir;

    struct Fixture {
        registry: Arc<SqliteDumpRegistry>,
        blobs: Arc<MemoryBlobStore>,
        sink: Arc<RecordingSink>,
        temp: TempDir,
        settings: DumpSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Arc::new(SqliteDumpRegistry::in_memory().unwrap()),
                blobs: Arc::new(MemoryBlobStore::new()),
                sink: Arc::new(RecordingSink::new()),
                temp: TempDir::new().unwrap(),
                settings: DumpSettings {
                    db_name: "examplewiki".to_string(),
                    ..Default::default()
                },
            }
        }

        fn with_profile(mut self, profile: DumpProfile) -> Self {
            self.settings = self.settings.with_profile(profile);
            self
        }

        fn queue(&self, filename: &str, dump_type: &str) -> GenerateRequest {
            self.registry
                .insert(&DumpRecord::new_queued(filename, dump_type, 1))
                .unwrap();
            GenerateRequest {
                dump_type: dump_type.to_string(),
                filename: filename.to_string(),
                arguments: vec![],
            }
        }

        fn worker(&self, runner: Arc<FakeCommandRunner>) -> DumpWorker {
            DumpWorker::new(
                Arc::new(self.settings.clone()),
                Arc::new(StatusManager::new(self.registry.clone(), self.temp.path())),
                Arc::new(ChunkedStorage::new(self.blobs.clone())),
                runner,
                self.sink.clone(),
                self.temp.path(),
            )
        }

        fn updates(&self) -> Vec<StatusUpdate> {
            self.sink
                .take()
                .into_iter()
                .map(|job| match job {
                    DumpJob::StatusUpdate(update) => update,
                    other => panic!("unexpected job {:?}", other),
                })
                .collect()
        }
    }

    fn temp_store_profile(start_chunk_size: u64, chunk_size: u64) -> DumpProfile {
        let mut profile = DumpProfile::shell("xml", "/usr/bin/export", &["--out=${filename}"]);
        profile.use_backend_temp_store = true;
        profile.start_chunk_size = start_chunk_size;
        profile.chunk_size = chunk_size;
        profile
    }

    /// Runner that writes `size` bytes to the temp file named in `--out=`.
    fn writing_runner(temp_dir: PathBuf, size: usize) -> Arc<FakeCommandRunner> {
        Arc::new(FakeCommandRunner::new(move |spec| {
            let name = spec.args[0].trim_start_matches("--out=");
            std::fs::write(temp_dir.join(name), vec![b'x'; size])?;
            Ok(CommandOutput {
                exit_code: 0,
                output: String::new(),
            })
        }))
    }

    #[test]
    fn test_substitute_filename_any_case() {
        let options = vec![
            "--output=gzip:/tmp/${filename}".to_string(),
            "${FILENAME}.log".to_string(),
            "--plain".to_string(),
        ];
        assert_eq!(
            substitute_filename(&options, "a$1.xml"),
            vec!["--output=gzip:/tmp/a$1.xml", "a$1.xml.log", "--plain"]
        );
    }

    #[test]
    fn test_success_hands_off_completed_without_writing_it() {
        let fx = Fixture::new().with_profile(temp_store_profile(1000, 0));
        let request = fx.queue("a.xml", "xml");
        let runner = writing_runner(fx.temp.path().to_path_buf(), 500);

        fx.worker(runner.clone()).run(&request).unwrap();

        assert_eq!(runner.calls()[0].args, vec!["--out=a.xml"]);
        assert_eq!(
            fx.registry.get_status("a.xml").unwrap(),
            Some(DumpStatus::InProgress)
        );
        assert_eq!(fx.updates(), vec![StatusUpdate::completed("a.xml", 500)]);
        assert_eq!(fx.blobs.keys(), vec!["dumps-backup/a.xml"]);
        assert!(!fx.temp.path().join("a.xml").exists());
    }

    #[test]
    fn test_large_output_is_chunked() {
        let fx = Fixture::new().with_profile(temp_store_profile(100, 64));
        let request = fx.queue("a.xml", "xml");
        let runner = writing_runner(fx.temp.path().to_path_buf(), 150);

        fx.worker(runner).run(&request).unwrap();

        assert_eq!(fx.updates(), vec![StatusUpdate::completed("a.xml", 150)]);
        assert_eq!(fx.blobs.keys().len(), 3);
    }

    #[test]
    fn test_non_zero_exit_uses_configured_comment() {
        let mut profile = temp_store_profile(100, 0);
        profile
            .log_failed_exit_code_comments
            .insert(2, "disk full upstream".to_string());
        let fx = Fixture::new().with_profile(profile);
        let request = fx.queue("a.xml", "xml");

        fx.worker(Arc::new(FakeCommandRunner::exiting_with(2)))
            .run(&request)
            .unwrap();
        let request = fx.queue("b.xml", "xml");
        fx.worker(Arc::new(FakeCommandRunner::exiting_with(7)))
            .run(&request)
            .unwrap();

        assert_eq!(
            fx.updates(),
            vec![
                StatusUpdate::failed("a.xml", "disk full upstream"),
                StatusUpdate::failed("b.xml", "Something went wrong: Command exited with 7"),
            ]
        );
        assert!(fx.blobs.keys().is_empty());
    }

    #[test]
    fn test_spawn_failure_and_timeout() {
        let fx = Fixture::new().with_profile(temp_store_profile(100, 0));

        let request = fx.queue("a.xml", "xml");
        let spawn_fails = Arc::new(FakeCommandRunner::new(|spec| {
            Err(CommandError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            })
        }));
        fx.worker(spawn_fails).run(&request).unwrap();

        let request = fx.queue("b.xml", "xml");
        let times_out = Arc::new(FakeCommandRunner::new(|_| Err(CommandError::TimedOut(5))));
        fx.worker(times_out).run(&request).unwrap();

        assert_eq!(
            fx.updates(),
            vec![
                StatusUpdate::failed("a.xml", NOT_EXECUTED_COMMENT),
                StatusUpdate::failed("b.xml", TIMED_OUT_COMMENT),
            ]
        );
    }

    #[test]
    fn test_completed_or_missing_dump_is_not_rerun() {
        let fx = Fixture::new().with_profile(temp_store_profile(100, 0));
        let request = fx.queue("a.xml", "xml");
        fx.registry
            .update_status("a.xml", DumpStatus::InProgress)
            .unwrap();
        fx.registry
            .update_status_and_size("a.xml", DumpStatus::Completed, 42)
            .unwrap();
        let runner = Arc::new(FakeCommandRunner::exiting_with(0));
        let worker = fx.worker(runner.clone());

        worker.run(&request).unwrap();
        worker
            .run(&GenerateRequest {
                dump_type: "xml".into(),
                filename: "gone.xml".into(),
                arguments: vec![],
            })
            .unwrap();

        assert!(runner.calls().is_empty());
        assert!(fx.updates().is_empty());
        assert_eq!(fx.registry.get("a.xml").unwrap().unwrap().size, 42);
        assert!(fx.registry.get_audit_for_file("a.xml").unwrap().is_empty());
    }

    #[test]
    fn test_unconfigured_type_fails_without_running() {
        let fx = Fixture::new();
        let request = fx.queue("a.xml", "removed");
        let runner = Arc::new(FakeCommandRunner::exiting_with(0));

        fx.worker(runner.clone()).run(&request).unwrap();

        assert!(runner.calls().is_empty());
        assert_eq!(
            fx.updates(),
            vec![StatusUpdate::failed("a.xml", "Unknown dump type removed")]
        );
    }

    #[test]
    fn test_missing_temp_output_fails() {
        let fx = Fixture::new().with_profile(temp_store_profile(100, 0));
        let request = fx.queue("a.xml", "xml");

        fx.worker(Arc::new(FakeCommandRunner::exiting_with(0)))
            .run(&request)
            .unwrap();

        assert_eq!(fx.updates(), vec![StatusUpdate::failed("a.xml", OPEN_ERROR)]);
    }

    #[test]
    fn test_mwscript_command_line() {
        let mut profile = DumpProfile::shell("xml", "dumpBackup.php", &["--full", "--output=${filename}"]);
        profile.generate.kind = GenerateKind::MwScript;
        let mut fx = Fixture::new().with_profile(profile);
        fx.settings.maintenance_runner = vec!["php".into(), "/srv/mw/run.php".into()];
        let request = GenerateRequest {
            arguments: vec!["--namespaces=0".into()],
            ..fx.queue("a.xml", "xml")
        };
        let runner = Arc::new(FakeCommandRunner::exiting_with(1));

        fx.worker(runner.clone()).run(&request).unwrap();

        let spec = &runner.calls()[0];
        assert_eq!(spec.program, "php");
        assert_eq!(
            spec.args,
            vec![
                "/srv/mw/run.php",
                "dumpBackup.php",
                "--full",
                "--output=a.xml",
                "--namespaces=0",
                "--wiki",
                "examplewiki"
            ]
        );
    }

    #[test]
    fn test_queue_failure_is_an_error() {
        let fx = Fixture::new().with_profile(temp_store_profile(100, 0));
        let request = fx.queue("a.xml", "xml");
        fx.sink.close();

        let result = fx
            .worker(Arc::new(FakeCommandRunner::exiting_with(3)))
            .run(&request);
        assert!(result.is_err());
    }
}
