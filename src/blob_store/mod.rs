//! Path-addressed durable byte storage.
//!
//! Keys are `/`-separated logical paths such as `dumps-backup/wiki_xml_ab.xml.gz`.
//! The store is constructed once from configuration and injected into every
//! component that needs it.

mod fs_backend;
#[cfg(test)]
mod memory_backend;

pub use fs_backend::FsBlobStore;
#[cfg(test)]
pub use memory_backend::MemoryBlobStore;

use std::io::Read;
use std::path::Path;

/// Container holding every dump blob.
pub const DUMPS_CONTAINER: &str = "dumps-backup";

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type BlobResult<T> = std::result::Result<T, BlobStoreError>;

/// Size and modification time of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStat {
    pub size: u64,
    /// Unix seconds.
    pub modified: i64,
}

/// Logical key of `name` inside `container`.
pub fn blob_key(container: &str, name: &str) -> String {
    format!("{}/{}", container.trim_end_matches('/'), name)
}

/// Storage backend for dump blobs.
///
/// All operations are blocking; async callers go through `spawn_blocking`.
pub trait BlobStore: Send + Sync {
    /// Whether a blob exists at `key`.
    fn exists(&self, key: &str) -> BlobResult<bool>;

    /// Create (or replace) a blob from bytes.
    fn create(&self, key: &str, data: &[u8]) -> BlobResult<()>;

    /// Create (or replace) a blob from a local file.
    fn store_file(&self, key: &str, src: &Path) -> BlobResult<()>;

    /// Open a blob for sequential reading.
    fn open(&self, key: &str) -> BlobResult<Box<dyn Read + Send>>;

    /// Delete a blob. Deleting a missing blob is not an error.
    fn delete(&self, key: &str) -> BlobResult<()>;

    /// Whether a directory (container) exists.
    fn dir_exists(&self, dir: &str) -> BlobResult<bool>;

    /// Create a directory (container) if missing.
    fn prepare_dir(&self, dir: &str) -> BlobResult<()>;

    /// Size and mtime of a blob, `None` when missing.
    fn stat(&self, key: &str) -> BlobResult<Option<BlobStat>>;

    /// Size of a blob in bytes, `None` when missing.
    fn size(&self, key: &str) -> BlobResult<Option<u64>> {
        Ok(self.stat(key)?.map(|s| s.size))
    }

    /// Names of the blobs directly inside `dir`, sorted.
    fn list(&self, dir: &str) -> BlobResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key() {
        assert_eq!(blob_key("dumps-backup", "a.xml"), "dumps-backup/a.xml");
        assert_eq!(blob_key("dumps-backup/", "a.xml"), "dumps-backup/a.xml");
    }
}
