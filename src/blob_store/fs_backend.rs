use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::{BlobResult, BlobStat, BlobStore, BlobStoreError};

/// Blob store on the local filesystem, rooted at a directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> BlobResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            root: fs::canonicalize(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a key. Export commands that write straight into
    /// the store are pointed here.
    pub fn path_of(&self, key: &str) -> BlobResult<PathBuf> {
        self.resolve(key)
    }

    /// Reject keys that could escape the store root.
    fn validate_key(key: &str) -> BlobResult<()> {
        if key.is_empty() {
            return Err(BlobStoreError::InvalidKey("empty".into()));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        if Path::new(key)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(BlobStoreError::InvalidKey(format!(
                "parent traversal '{key}'"
            )));
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> BlobResult<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write into a temp file next to `path`, then rename into place so
    /// readers never see a partial blob.
    fn atomic_write_from<R: Read>(&self, path: &Path, mut reader: R) -> BlobResult<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::copy(&mut reader, &mut tmp)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, key: &str) -> BlobResult<bool> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, key: &str, data: &[u8]) -> BlobResult<()> {
        let path = self.resolve(key)?;
        self.atomic_write_from(&path, data)
    }

    fn store_file(&self, key: &str, src: &Path) -> BlobResult<()> {
        let path = self.resolve(key)?;
        let file = fs::File::open(src)?;
        self.atomic_write_from(&path, file)
    }

    fn open(&self, key: &str) -> BlobResult<Box<dyn Read + Send>> {
        let path = self.resolve(key)?;
        match fs::File::open(&path) {
            Ok(file) => Ok(Box::new(std::io::BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn dir_exists(&self, dir: &str) -> BlobResult<bool> {
        let path = self.resolve(dir)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn prepare_dir(&self, dir: &str) -> BlobResult<()> {
        let path = self.resolve(dir)?;
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn stat(&self, key: &str) -> BlobResult<Option<BlobStat>> {
        let path = self.resolve(key)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified: DateTime<Utc> = meta.modified()?.into();
        Ok(Some(BlobStat {
            size: meta.len(),
            modified: modified.timestamp(),
        }))
    }

    fn list(&self, dir: &str) -> BlobResult<Vec<String>> {
        let path = self.resolve(dir)?;
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&path).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| BlobStoreError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            // In-flight atomic writes
            if name.starts_with(".tmp") {
                continue;
            }
            names.push(name.into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_read_delete() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        store.create("dumps-backup/a.xml", b"hello").unwrap();
        assert!(store.exists("dumps-backup/a.xml").unwrap());
        assert_eq!(store.size("dumps-backup/a.xml").unwrap(), Some(5));

        let mut content = String::new();
        store
            .open("dumps-backup/a.xml")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");

        store.delete("dumps-backup/a.xml").unwrap();
        assert!(!store.exists("dumps-backup/a.xml").unwrap());
        // Deleting again is fine
        store.delete("dumps-backup/a.xml").unwrap();
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.open("dumps-backup/missing"),
            Err(BlobStoreError::NotFound(_))
        ));
        assert_eq!(store.stat("dumps-backup/missing").unwrap(), None);
    }

    #[test]
    fn test_rejects_unsafe_keys() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.exists("../etc/passwd"),
            Err(BlobStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.create("/abs", b""),
            Err(BlobStoreError::InvalidKey(_))
        ));
        assert!(matches!(store.exists(""), Err(BlobStoreError::InvalidKey(_))));
    }

    #[test]
    fn test_store_file_and_list() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        assert!(!store.dir_exists("dumps-backup").unwrap());
        store.prepare_dir("dumps-backup").unwrap();
        assert!(store.dir_exists("dumps-backup").unwrap());

        let src = scratch.path().join("out.bin");
        fs::write(&src, vec![7u8; 1000]).unwrap();
        store.store_file("dumps-backup/b.bin", &src).unwrap();
        store.create("dumps-backup/a.bin", b"x").unwrap();

        assert_eq!(
            store.list("dumps-backup").unwrap(),
            vec!["a.bin".to_string(), "b.bin".to_string()]
        );
        assert_eq!(store.size("dumps-backup/b.bin").unwrap(), Some(1000));
        assert!(store.stat("dumps-backup/b.bin").unwrap().unwrap().modified > 0);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.list("dumps-backup").unwrap().is_empty());
    }
}
