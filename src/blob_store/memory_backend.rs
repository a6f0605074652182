use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;

use super::{BlobResult, BlobStat, BlobStore, BlobStoreError};

#[derive(Default)]
struct Inner {
    blobs: BTreeMap<String, (Vec<u8>, i64)>,
    dirs: HashSet<String>,
    failing_writes: HashSet<String>,
    failing_deletes: HashSet<String>,
}

/// In-memory blob store for tests, with injectable write and delete
/// failures for specific keys.
#[derive(Default)]
pub struct MemoryBlobStore {
    inner: Mutex<Inner>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write to `key` fail.
    pub fn fail_writes_to(&self, key: &str) {
        self.inner.lock().unwrap().failing_writes.insert(key.to_string());
    }

    /// Make every later delete of `key` fail.
    pub fn fail_deletes_of(&self, key: &str) {
        self.inner.lock().unwrap().failing_deletes.insert(key.to_string());
    }

    /// Override the modification time of a blob.
    pub fn set_modified(&self, key: &str, modified: i64) {
        if let Some(blob) = self.inner.lock().unwrap().blobs.get_mut(key) {
            blob.1 = modified;
        }
    }

    /// Raw content of a blob.
    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().blobs.get(key).map(|b| b.0.clone())
    }

    /// Every key currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().blobs.keys().cloned().collect()
    }

    fn put(&self, key: &str, data: Vec<u8>) -> BlobResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_writes.contains(key) {
            return Err(BlobStoreError::Backend(format!("write to {key} refused")));
        }
        let now = chrono::Utc::now().timestamp();
        inner.blobs.insert(key.to_string(), (data, now));
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    fn exists(&self, key: &str) -> BlobResult<bool> {
        Ok(self.inner.lock().unwrap().blobs.contains_key(key))
    }

    fn create(&self, key: &str, data: &[u8]) -> BlobResult<()> {
        self.put(key, data.to_vec())
    }

    fn store_file(&self, key: &str, src: &Path) -> BlobResult<()> {
        let data = std::fs::read(src)?;
        self.put(key, data)
    }

    fn open(&self, key: &str) -> BlobResult<Box<dyn Read + Send>> {
        let inner = self.inner.lock().unwrap();
        match inner.blobs.get(key) {
            Some((data, _)) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(BlobStoreError::NotFound(key.to_string())),
        }
    }

    fn delete(&self, key: &str) -> BlobResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_deletes.contains(key) {
            return Err(BlobStoreError::Backend(format!("delete of {key} refused")));
        }
        inner.blobs.remove(key);
        Ok(())
    }

    fn dir_exists(&self, dir: &str) -> BlobResult<bool> {
        Ok(self.inner.lock().unwrap().dirs.contains(dir))
    }

    fn prepare_dir(&self, dir: &str) -> BlobResult<()> {
        self.inner.lock().unwrap().dirs.insert(dir.to_string());
        Ok(())
    }

    fn stat(&self, key: &str) -> BlobResult<Option<BlobStat>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .blobs
            .get(key)
            .map(|(data, modified)| BlobStat {
                size: data.len() as u64,
                modified: *modified,
            }))
    }

    fn list(&self, dir: &str) -> BlobResult<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .inner
            .lock()
            .unwrap()
            .blobs
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_injection() {
        let store = MemoryBlobStore::new();
        store.create("c/a", b"1").unwrap();
        store.fail_deletes_of("c/a");
        store.fail_writes_to("c/b");

        assert!(store.delete("c/a").is_err());
        assert!(store.exists("c/a").unwrap());
        assert!(store.create("c/b", b"2").is_err());
        assert!(!store.exists("c/b").unwrap());
    }

    #[test]
    fn test_list_only_direct_children() {
        let store = MemoryBlobStore::new();
        store.create("c/a", b"1").unwrap();
        store.create("c/b", b"22").unwrap();
        store.create("c/sub/x", b"3").unwrap();
        store.create("other/y", b"4").unwrap();

        assert_eq!(store.list("c").unwrap(), vec!["a", "b"]);
        store.set_modified("c/b", 42);
        assert_eq!(
            store.stat("c/b").unwrap(),
            Some(BlobStat {
                size: 2,
                modified: 42
            })
        );
    }
}
