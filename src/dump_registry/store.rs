//! Dump registry storage and persistence.
//!
//! Provides SQLite-backed storage for dump records and the dump audit log.

use super::models::*;
use super::schema::{convert_legacy_status, DATA_DUMP_VERSIONED_SCHEMAS};
use crate::sqlite_persistence::{
    migrate_if_needed, open_versioned_db, read_schema_version, set_schema_version,
};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const DB_LABEL: &str = "dump registry";

/// Raised by [`DumpRegistry::insert`] when a record with the same filename
/// already exists.
#[derive(Debug, thiserror::Error)]
#[error("Dump {0} already exists")]
pub struct DuplicateDump(pub String);

/// Trait for dump registry operations.
///
/// One record per filename. Lookups return `None` rather than an error when
/// the record does not exist.
pub trait DumpRegistry: Send + Sync {
    // === Records ===

    /// Insert a new record. Fails with [`DuplicateDump`] if the filename is taken.
    fn insert(&self, record: &DumpRecord) -> Result<()>;

    /// Get a record by filename.
    fn get(&self, filename: &str) -> Result<Option<DumpRecord>>;

    /// Get only the status of a record.
    fn get_status(&self, filename: &str) -> Result<Option<DumpStatus>>;

    /// Update the status. Returns false if the record does not exist.
    fn update_status(&self, filename: &str, status: DumpStatus) -> Result<bool>;

    /// Update status and size in one statement. Returns false if the record
    /// does not exist.
    fn update_status_and_size(&self, filename: &str, status: DumpStatus, size: u64)
        -> Result<bool>;

    /// Apply a status change together with its audit entry, atomically.
    ///
    /// `size` is written along with the status when given. Returns false,
    /// writing nothing, if the record does not exist.
    fn transition_status(
        &self,
        filename: &str,
        status: DumpStatus,
        size: Option<u64>,
        audit: Option<AuditLogEntry>,
    ) -> Result<bool>;

    /// Delete a record. Returns false if it did not exist.
    fn delete(&self, filename: &str) -> Result<bool>;

    // === Queries ===

    /// Number of records of a given type, any status.
    fn count_by_type(&self, dump_type: &str) -> Result<usize>;

    /// The oldest record (by timestamp) of a given type.
    fn oldest_by_type(&self, dump_type: &str) -> Result<Option<DumpRecord>>;

    /// The `limit` oldest records of a given type, oldest first.
    fn oldest_n_by_type(&self, dump_type: &str, limit: usize) -> Result<Vec<DumpRecord>>;

    /// Records matching the filter, newest first.
    fn list(&self, filter: &DumpFilter) -> Result<Vec<DumpRecord>>;

    /// Distinct dump types present in the registry.
    fn distinct_types(&self) -> Result<Vec<String>>;

    /// All records of a given type.
    fn list_by_type(&self, dump_type: &str) -> Result<Vec<DumpRecord>>;

    /// Every filename in the registry.
    fn all_filenames(&self) -> Result<Vec<String>>;

    // === Audit Logging ===

    /// Append an audit entry.
    fn log_audit_event(&self, entry: AuditLogEntry) -> Result<()>;

    /// Audit entries for a filename, oldest first.
    fn get_audit_for_file(&self, filename: &str) -> Result<Vec<AuditLogEntry>>;

    /// Most recent audit entries, newest first.
    fn get_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>>;
}

/// SQLite-backed dump registry.
pub struct SqliteDumpRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDumpRegistry {
    /// Opens an existing registry database, migrating it forward if needed,
    /// or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path, DATA_DUMP_VERSIONED_SCHEMAS, DB_LABEL)?;
        Ok(SqliteDumpRegistry {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory registry.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        DATA_DUMP_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(SqliteDumpRegistry {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Offline conversion of a legacy registry file.
    ///
    /// Unlike [`SqliteDumpRegistry::new`] this never creates a database and
    /// tolerates files whose legacy columns were partially converted by hand.
    /// Returns the number of rows converted; 0 when already up to date.
    pub fn migrate_legacy_file<P: AsRef<Path>>(db_path: P) -> Result<usize> {
        let db_path = db_path.as_ref();
        if !db_path.exists() {
            bail!("Registry database not found: {:?}", db_path);
        }
        let conn = Connection::open(db_path)?;
        let version = read_schema_version(&conn, DB_LABEL)?;
        let converted = convert_legacy_status(&conn)?;
        if migrate_if_needed(&conn, DATA_DUMP_VERSIONED_SCHEMAS, version, DB_LABEL)? {
            return Ok(converted);
        }
        set_schema_version(&conn, DATA_DUMP_VERSIONED_SCHEMAS.len() - 1)?;
        Ok(converted)
    }

    /// Shared handle to the underlying connection, for stores living in the
    /// same database file.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn insert_audit_entry(conn: &Connection, entry: &AuditLogEntry) -> Result<()> {
        conn.execute(
            "INSERT INTO data_dump_audit_log (timestamp, action, performer, filename, comment)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.timestamp,
                entry.action.as_str(),
                entry.performer,
                entry.filename,
                entry.comment,
            ],
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DumpRecord> {
        let status: String = row.get("status")?;
        Ok(DumpRecord {
            filename: row.get("filename")?,
            dump_type: row.get("dump_type")?,
            // Unknown strings can only come from hand edits; treat them as stuck
            status: DumpStatus::from_str(&status).unwrap_or(DumpStatus::Queued),
            size: row.get::<_, i64>("size")?.max(0) as u64,
            timestamp: row.get("timestamp")?,
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditLogEntry> {
        let action: String = row.get("action")?;
        Ok(AuditLogEntry {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            action: AuditAction::from_str(&action).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown audit action {}", action).into(),
                )
            })?,
            performer: row.get("performer")?,
            filename: row.get("filename")?,
            comment: row.get("comment")?,
        })
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DumpRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

const RECORD_COLUMNS: &str = "filename, dump_type, status, size, timestamp";

impl DumpRegistry for SqliteDumpRegistry {
    fn insert(&self, record: &DumpRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO data_dump (filename, dump_type, status, size, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.filename,
                record.dump_type,
                record.status.as_str(),
                record.size as i64,
                record.timestamp,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(DuplicateDump(record.filename.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, filename: &str) -> Result<Option<DumpRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM data_dump WHERE filename = ?1"),
                params![filename],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get_status(&self, filename: &str) -> Result<Option<DumpStatus>> {
        Ok(self.get(filename)?.map(|r| r.status))
    }

    fn update_status(&self, filename: &str, status: DumpStatus) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE data_dump SET status = ?1 WHERE filename = ?2",
            params![status.as_str(), filename],
        )?;
        Ok(rows > 0)
    }

    fn update_status_and_size(
        &self,
        filename: &str,
        status: DumpStatus,
        size: u64,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE data_dump SET status = ?1, size = ?2 WHERE filename = ?3",
            params![status.as_str(), size as i64, filename],
        )?;
        Ok(rows > 0)
    }

    fn transition_status(
        &self,
        filename: &str,
        status: DumpStatus,
        size: Option<u64>,
        audit: Option<AuditLogEntry>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let rows = match size {
            Some(size) => tx.execute(
                "UPDATE data_dump SET status = ?1, size = ?2 WHERE filename = ?3",
                params![status.as_str(), size as i64, filename],
            )?,
            None => tx.execute(
                "UPDATE data_dump SET status = ?1 WHERE filename = ?2",
                params![status.as_str(), filename],
            )?,
        };
        if rows == 0 {
            return Ok(false);
        }
        if let Some(entry) = audit {
            Self::insert_audit_entry(&tx, &entry)?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn delete(&self, filename: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM data_dump WHERE filename = ?1", params![filename])?;
        Ok(rows > 0)
    }

    fn count_by_type(&self, dump_type: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM data_dump WHERE dump_type = ?1",
            params![dump_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn oldest_by_type(&self, dump_type: &str) -> Result<Option<DumpRecord>> {
        Ok(self.oldest_n_by_type(dump_type, 1)?.into_iter().next())
    }

    fn oldest_n_by_type(&self, dump_type: &str, limit: usize) -> Result<Vec<DumpRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM data_dump WHERE dump_type = ?1
                 ORDER BY timestamp ASC, filename ASC LIMIT ?2"
            ),
            &[&dump_type, &(limit as i64)],
        )
    }

    fn list(&self, filter: &DumpFilter) -> Result<Vec<DumpRecord>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM data_dump WHERE 1 = 1");
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(dump_type) = &filter.dump_type {
            values.push(dump_type);
            sql.push_str(&format!(" AND dump_type = ?{}", values.len()));
        }
        if let Some(filename) = &filter.filename {
            values.push(filename);
            sql.push_str(&format!(" AND filename = ?{}", values.len()));
        }
        if let Some(timestamp) = &filter.timestamp {
            values.push(timestamp);
            sql.push_str(&format!(" AND timestamp = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY timestamp DESC, filename ASC");
        self.query_records(&sql, &values)
    }

    fn distinct_types(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT dump_type FROM data_dump ORDER BY dump_type")?;
        let types = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(types)
    }

    fn list_by_type(&self, dump_type: &str) -> Result<Vec<DumpRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM data_dump WHERE dump_type = ?1
                 ORDER BY timestamp ASC, filename ASC"
            ),
            &[&dump_type],
        )
    }

    fn all_filenames(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT filename FROM data_dump ORDER BY filename")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn log_audit_event(&self, entry: AuditLogEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::insert_audit_entry(&conn, &entry)
    }

    fn get_audit_for_file(&self, filename: &str) -> Result<Vec<AuditLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, action, performer, filename, comment
             FROM data_dump_audit_log WHERE filename = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![filename], Self::row_to_audit_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn get_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, action, performer, filename, comment
             FROM data_dump_audit_log ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let entries = stmt
            .query_map(params![limit as i64, offset as i64], Self::row_to_audit_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
