//! Durable registry of dump records.
//!
//! One row per requested dump, keyed by filename, plus an audit log of every
//! request, status transition and deletion.

mod audit_logger;
mod models;
mod schema;
mod store;

pub use audit_logger::{AuditLogger, MAINTENANCE_ACTOR};
pub use models::*;
pub use schema::DATA_DUMP_VERSIONED_SCHEMAS;
pub use store::{DumpRegistry, DuplicateDump, SqliteDumpRegistry};
