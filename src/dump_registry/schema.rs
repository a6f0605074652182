//! Database schema for the dump registry.
//!
//! Version 0 is the legacy layout that tracked progress with two booleans
//! (`completed`, `failed`). Version 1 replaces them with a single `status`
//! column and adds the audit log. Version 2 adds the pending job table
//! backing the generation queue.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

// =============================================================================
// Version 0 (legacy)
// =============================================================================

const DATA_DUMP_TABLE_V0: Table = Table {
    name: "data_dump",
    columns: &[
        sqlite_column!("filename", &SqlType::Text, is_primary_key = true),
        sqlite_column!("dump_type", &SqlType::Text, non_null = true),
        sqlite_column!(
            "completed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "failed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "size",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

// =============================================================================
// Version 1
// =============================================================================

/// Column order matches what `ALTER TABLE` leaves behind after the v0
/// migration, so migrated and freshly created files validate the same way.
const DATA_DUMP_TABLE_V1: Table = Table {
    name: "data_dump",
    columns: &[
        sqlite_column!("filename", &SqlType::Text, is_primary_key = true),
        sqlite_column!("dump_type", &SqlType::Text, non_null = true),
        sqlite_column!(
            "size",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'queued'")
        ),
    ],
    indices: &[
        ("idx_data_dump_type_timestamp", "dump_type, timestamp"),
        ("idx_data_dump_status", "status"),
    ],
};

const DATA_DUMP_AUDIT_LOG_TABLE_V1: Table = Table {
    name: "data_dump_audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("action", &SqlType::Text, non_null = true),
        sqlite_column!("performer", &SqlType::Text, non_null = true),
        sqlite_column!("filename", &SqlType::Text),
        sqlite_column!("comment", &SqlType::Text),
    ],
    indices: &[
        ("idx_dump_audit_timestamp", "timestamp"),
        ("idx_dump_audit_filename", "filename"),
    ],
};

// =============================================================================
// Version 2
// =============================================================================

/// Jobs waiting for, or held by, a generation worker. A row is removed once
/// its job is finished for good.
const DATA_DUMP_JOB_TABLE_V2: Table = Table {
    name: "data_dump_job",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!(
            "state",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!(
            "attempt",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_data_dump_job_state", "state")],
};

/// Whether the `data_dump` table still carries the legacy boolean columns.
pub fn has_legacy_status_columns(conn: &Connection) -> Result<bool> {
    let mut stmt = conn.prepare("PRAGMA table_info(data_dump);")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|n| n == "completed") && names.iter().any(|n| n == "failed"))
}

/// Converts the legacy `completed`/`failed` booleans into `status`, then
/// drops them. Returns the number of rows converted.
///
/// A no-op returning 0 when the table has already been converted, so it can
/// be re-run safely.
pub fn convert_legacy_status(conn: &Connection) -> Result<usize> {
    if !has_legacy_status_columns(conn)? {
        return Ok(0);
    }

    let has_status: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('data_dump') WHERE name = 'status'")?
        .exists([])?;
    if !has_status {
        conn.execute(
            "ALTER TABLE data_dump ADD COLUMN status TEXT NOT NULL DEFAULT 'queued'",
            [],
        )?;
    }

    let converted = conn.execute(
        "UPDATE data_dump SET status = CASE
            WHEN completed = 1 AND failed != 1 THEN 'completed'
            WHEN failed = 1 THEN 'failed'
            ELSE 'queued'
         END",
        [],
    )?;

    conn.execute("ALTER TABLE data_dump DROP COLUMN completed", [])?;
    conn.execute("ALTER TABLE data_dump DROP COLUMN failed", [])?;

    info!("Converted {} legacy dump rows to the status column", converted);
    Ok(converted)
}

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    convert_legacy_status(conn)?;
    DATA_DUMP_TABLE_V1.create_indices(conn)?;
    DATA_DUMP_AUDIT_LOG_TABLE_V1.create(conn)?;
    Ok(())
}

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    DATA_DUMP_JOB_TABLE_V2.create(conn)
}

pub const DATA_DUMP_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[DATA_DUMP_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[DATA_DUMP_TABLE_V1, DATA_DUMP_AUDIT_LOG_TABLE_V1],
        migration: Some(migrate_v0_to_v1),
    },
    VersionedSchema {
        version: 2,
        tables: &[
            DATA_DUMP_TABLE_V1,
            DATA_DUMP_AUDIT_LOG_TABLE_V1,
            DATA_DUMP_JOB_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
