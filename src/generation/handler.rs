use std::sync::Arc;

use anyhow::Result;

use super::relay::StatusUpdateRelay;
use super::worker::DumpWorker;
use crate::job_queue::{DumpJob, JobHandler, RetryPolicy};

/// Routes queued dump jobs to the worker or the relay.
pub struct DumpJobHandler {
    worker: DumpWorker,
    relay: StatusUpdateRelay,
    allow_retries: bool,
    max_retries: u32,
}

impl DumpJobHandler {
    pub fn new(
        worker: DumpWorker,
        relay: StatusUpdateRelay,
        allow_retries: bool,
        max_retries: u32,
    ) -> Self {
        Self {
            worker,
            relay,
            allow_retries,
            max_retries,
        }
    }
}

impl JobHandler for DumpJobHandler {
    fn handle(&self, job: &DumpJob) -> Result<()> {
        match job {
            DumpJob::Generate(request) => self.worker.run(request),
            DumpJob::StatusUpdate(update) => self.relay.apply(update),
        }
    }

    /// Generation is retried only when enabled; status updates always are,
    /// since they are cheap and must not be lost.
    fn retry_policy(&self, job: &DumpJob) -> RetryPolicy {
        match job {
            DumpJob::Generate(_) if !self.allow_retries => RetryPolicy::disabled(),
            _ => RetryPolicy::new(self.max_retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::chunked_storage::ChunkedStorage;
    use crate::config::{DumpProfile, DumpSettings};
    use crate::dump_registry::{DumpRecord, DumpRegistry, DumpStatus, SqliteDumpRegistry};
    use crate::generation::command::fake::FakeCommandRunner;
    use crate::generation::StatusManager;
    use crate::job_queue::{GenerateRequest, RecordingSink, StatusUpdate};
    use tempfile::TempDir;

    fn handler(allow_retries: bool) -> (DumpJobHandler, Arc<SqliteDumpRegistry>, Arc<RecordingSink>, TempDir) {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(SqliteDumpRegistry::in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new());
        let status = Arc::new(StatusManager::new(registry.clone(), temp.path()));
        let settings = DumpSettings::default().with_profile(DumpProfile::shell("xml", "true", &[]));
        let worker = DumpWorker::new(
            Arc::new(settings),
            status.clone(),
            Arc::new(ChunkedStorage::new(Arc::new(MemoryBlobStore::new()))),
            Arc::new(FakeCommandRunner::exiting_with(4)),
            sink.clone(),
            temp.path(),
        );
        let relay = StatusUpdateRelay::new(status, registry.clone());
        (
            DumpJobHandler::new(worker, relay, allow_retries, 3),
            registry,
            sink,
            temp,
        )
    }

    #[test]
    fn test_generate_then_relay_reaches_terminal_status() {
        let (handler, registry, sink, _temp) = handler(false);
        registry
            .insert(&DumpRecord::new_queued("a.xml", "xml", 1))
            .unwrap();

        handler
            .handle(&DumpJob::Generate(GenerateRequest {
                dump_type: "xml".into(),
                filename: "a.xml".into(),
                arguments: vec![],
            }))
            .unwrap();
        let follow_up = sink.take();
        assert_eq!(
            follow_up,
            vec![DumpJob::StatusUpdate(StatusUpdate::failed(
                "a.xml",
                "Something went wrong: Command exited with 4"
            ))]
        );
        for job in &follow_up {
            handler.handle(job).unwrap();
        }

        assert_eq!(
            registry.get_status("a.xml").unwrap(),
            Some(DumpStatus::Failed)
        );
    }

    #[test]
    fn test_retry_policy_per_job_kind() {
        let generate = DumpJob::Generate(GenerateRequest {
            dump_type: "xml".into(),
            filename: "a.xml".into(),
            arguments: vec![],
        });
        let update = DumpJob::StatusUpdate(StatusUpdate::completed("a.xml", 1));

        let (strict, _, _, _t1) = handler(false);
        assert!(!strict.retry_policy(&generate).should_retry(0));
        assert!(strict.retry_policy(&update).should_retry(0));

        let (lenient, _, _, _t2) = handler(true);
        assert!(lenient.retry_policy(&generate).should_retry(2));
        assert!(!lenient.retry_policy(&generate).should_retry(3));
    }
}
