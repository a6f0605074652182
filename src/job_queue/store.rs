//! Durable backing for the dump job queue.
//!
//! A job is written to the `data_dump_job` table of the registry database
//! when it is pushed and removed once it is finished for good, so a restart
//! picks up whatever was still pending or running.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::{params, Connection};
use tracing::warn;

use super::models::DumpJob;
use crate::dump_registry::SqliteDumpRegistry;

const STATE_PENDING: &str = "pending";
const STATE_CLAIMED: &str = "claimed";

/// An unfinished job as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredJob {
    pub id: i64,
    pub job: DumpJob,
    pub attempt: u32,
}

pub trait JobStore: Send + Sync {
    /// Persist a new pending job. Returns its id.
    fn enqueue(&self, job: &DumpJob, attempt: u32) -> Result<i64>;

    /// Mark a pending job as taken by a worker. Returns false if it is not
    /// pending.
    fn claim(&self, id: i64) -> Result<bool>;

    /// Put a job back to pending for another attempt.
    fn reschedule(&self, id: i64, attempt: u32) -> Result<()>;

    /// Forget a finished job.
    fn complete(&self, id: i64) -> Result<()>;

    /// Every unfinished job, oldest first. Claims left by a previous run are
    /// released.
    fn recover(&self) -> Result<Vec<StoredJob>>;
}

/// Job store sharing the registry's SQLite connection.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new(registry: &SqliteDumpRegistry) -> Self {
        Self {
            conn: registry.connection(),
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl JobStore for SqliteJobStore {
    fn enqueue(&self, job: &DumpJob, attempt: u32) -> Result<i64> {
        let payload = serde_json::to_string(job)?;
        let now = Self::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO data_dump_job (kind, filename, payload, state, attempt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                job.kind(),
                job.filename(),
                payload,
                STATE_PENDING,
                attempt as i64,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn claim(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE data_dump_job SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
            params![STATE_CLAIMED, Self::now(), id, STATE_PENDING],
        )?;
        Ok(rows > 0)
    }

    fn reschedule(&self, id: i64, attempt: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE data_dump_job SET state = ?1, attempt = ?2, updated_at = ?3 WHERE id = ?4",
            params![STATE_PENDING, attempt as i64, Self::now(), id],
        )?;
        Ok(())
    }

    fn complete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM data_dump_job WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn recover(&self) -> Result<Vec<StoredJob>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE data_dump_job SET state = ?1 WHERE state = ?2",
            params![STATE_PENDING, STATE_CLAIMED],
        )?;

        let mut stmt =
            conn.prepare("SELECT id, payload, attempt FROM data_dump_job ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, payload, attempt) in rows {
            match serde_json::from_str::<DumpJob>(&payload) {
                Ok(job) => jobs.push(StoredJob {
                    id,
                    job,
                    attempt: attempt.max(0) as u32,
                }),
                Err(e) => {
                    warn!("Dropping unreadable stored job {}: {}", id, e);
                    conn.execute("DELETE FROM data_dump_job WHERE id = ?1", params![id])?;
                }
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_queue::{GenerateRequest, StatusUpdate};

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(&SqliteDumpRegistry::in_memory().unwrap())
    }

    fn generate(filename: &str) -> DumpJob {
        DumpJob::Generate(GenerateRequest {
            dump_type: "xml".into(),
            filename: filename.into(),
            arguments: vec!["--full".into()],
        })
    }

    #[test]
    fn test_unfinished_jobs_are_recovered_in_order() {
        let store = store();
        let first = store.enqueue(&generate("a.xml"), 0).unwrap();
        let second = store
            .enqueue(
                &DumpJob::StatusUpdate(StatusUpdate::completed("b.xml", 10)),
                1,
            )
            .unwrap();
        let done = store.enqueue(&generate("c.xml"), 0).unwrap();

        assert!(store.claim(first).unwrap());
        assert!(!store.claim(first).unwrap());
        store.claim(done).unwrap();
        store.complete(done).unwrap();

        let recovered = store.recover().unwrap();
        assert_eq!(
            recovered,
            vec![
                StoredJob {
                    id: first,
                    job: generate("a.xml"),
                    attempt: 0,
                },
                StoredJob {
                    id: second,
                    job: DumpJob::StatusUpdate(StatusUpdate::completed("b.xml", 10)),
                    attempt: 1,
                },
            ]
        );
        // Released claims can be taken again
        assert!(store.claim(first).unwrap());
    }

    #[test]
    fn test_reschedule_records_attempt() {
        let store = store();
        let id = store.enqueue(&generate("a.xml"), 0).unwrap();
        store.claim(id).unwrap();
        store.reschedule(id, 2).unwrap();

        assert!(store.claim(id).unwrap());
        assert_eq!(store.recover().unwrap()[0].attempt, 2);
    }

    #[test]
    fn test_unreadable_payload_is_dropped() {
        let store = store();
        store.enqueue(&generate("a.xml"), 0).unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE data_dump_job SET payload = 'not json'", [])
            .unwrap();

        assert!(store.recover().unwrap().is_empty());
        assert!(store.recover().unwrap().is_empty());
    }
}
