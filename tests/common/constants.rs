//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test actors or dump profiles change, update only this file.

// ============================================================================
// Test Actors
// ============================================================================

/// Actor holding every dump right
pub const ADMIN_ACTOR: &str = "admin";

/// Bearer token of the admin actor
pub const ADMIN_TOKEN: &str = "admin-secret-token";

/// Actor that may only list and download dumps
pub const READER_ACTOR: &str = "reader";

/// Bearer token of the reader actor
pub const READER_TOKEN: &str = "reader-secret-token";

// ============================================================================
// Test Dump Profiles
// ============================================================================

/// Wiki identifier used in generated filenames
pub const TEST_DB_NAME: &str = "testwiki";

/// Profile exporting straight to a single blob, limited to `LIMITED_TYPE_LIMIT`
pub const LIMITED_TYPE: &str = "xml";

pub const LIMITED_TYPE_LIMIT: i64 = 3;

/// Profile going through the temp store, exporting `SMALL_EXPORT_SIZE` bytes
pub const SMALL_TYPE: &str = "html";

/// Profile going through the temp store, exporting `LARGE_EXPORT_SIZE` bytes
pub const CHUNKED_TYPE: &str = "image";

/// Profile whose export always exits with `FAILING_EXIT_CODE`
pub const FAILING_TYPE: &str = "broken";

pub const FAILING_EXIT_CODE: i32 = 2;

pub const FAILING_EXIT_COMMENT: &str = "disk full upstream";

// ============================================================================
// Test File Sizes
// ============================================================================
// Production thresholds are in megabytes; these keep the same ratios in
// kilobytes.

/// Dumps larger than this are chunked
pub const START_CHUNK_SIZE: u64 = 100 * 1024;

pub const CHUNK_SIZE: u64 = 50 * 1024;

/// Export size below the chunking threshold
pub const SMALL_EXPORT_SIZE: u64 = 50 * 1024;

/// Export size producing three chunks
pub const LARGE_EXPORT_SIZE: u64 = 150 * 1024;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a dump to reach a terminal status (milliseconds)
pub const DUMP_TIMEOUT_MS: u64 = 15000;

/// Polling interval when waiting for a dump (milliseconds)
pub const DUMP_POLL_INTERVAL_MS: u64 = 100;
