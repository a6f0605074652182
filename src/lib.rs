//! Wiki data-dump server library
//!
//! This library exposes the internal modules for testing and for the
//! maintenance binary.

pub mod background_jobs;
pub mod blob_store;
pub mod chunked_storage;
pub mod config;
pub mod dump_manager;
pub mod dump_registry;
pub mod generation;
pub mod job_queue;
pub mod maintenance;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use dump_manager::{Actor, DumpManager};
pub use dump_registry::{DumpRegistry, SqliteDumpRegistry};
pub use server::{make_app, run_server, ActorDirectory, RequestsLoggingLevel, ServerConfig};
