//! Single-blob vs chunked storage of dump artifacts.
//!
//! Large exports are split into fixed-size `{filename}.part{N}` blobs. This
//! module is the only writer and deleter of dump blobs.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::blob_store::{blob_key, BlobResult, BlobStore, DUMPS_CONTAINER};
use crate::config::DumpProfile;
use crate::dump_registry::DumpStatus;
use crate::server::metrics;

pub const CHUNKING_ERROR: &str = "Chunking error";
pub const STORAGE_ERROR: &str = "Storage error";
pub const OPEN_ERROR: &str = "Could not open file for reading";

lazy_static! {
    static ref PART_RE: Regex = Regex::new(r"^(.*)\.part(\d+)$").expect("valid part regex");
}

/// Result of storing one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    pub status: DumpStatus,
    pub size: u64,
    pub comment: Option<String>,
}

impl StoreOutcome {
    fn completed(size: u64) -> Self {
        Self {
            status: DumpStatus::Completed,
            size,
            comment: None,
        }
    }

    fn failed(comment: &str) -> Self {
        Self {
            status: DumpStatus::Failed,
            size: 0,
            comment: Some(comment.to_string()),
        }
    }
}

/// Blobs in a container that belong to the same dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobGroup {
    pub base: String,
    /// The single blob first if present, then chunks by ascending index.
    pub members: Vec<String>,
}

pub struct ChunkedStorage {
    store: Arc<dyn BlobStore>,
    container: String,
}

impl ChunkedStorage {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_container(store, DUMPS_CONTAINER)
    }

    pub fn with_container(store: Arc<dyn BlobStore>, container: &str) -> Self {
        Self {
            store,
            container: container.to_string(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Logical key of a blob in the dumps container.
    pub fn key(&self, name: &str) -> String {
        blob_key(&self.container, name)
    }

    pub fn part_name(filename: &str, index: u64) -> String {
        format!("{}.part{}", filename, index)
    }

    /// Whether an export of `file_size` bytes is split into chunks.
    pub fn should_chunk(file_size: u64, profile: &DumpProfile) -> bool {
        profile.chunk_size > 0 && file_size > profile.start_chunk_size
    }

    /// Create the dumps container if it does not exist yet.
    pub fn prepare_container(&self) -> BlobResult<()> {
        if !self.store.dir_exists(&self.container)? {
            info!("Preparing blob container {}", self.container);
            self.store.prepare_dir(&self.container)?;
        }
        Ok(())
    }

    /// Persist the output of a successful export.
    ///
    /// Profiles without the temp store had the export write straight into
    /// the store, so only the size is read back. Otherwise `temp_path` is
    /// stored whole or in chunks, and removed afterwards on every path.
    pub fn store(
        &self,
        temp_path: &Path,
        filename: &str,
        file_size: u64,
        profile: &DumpProfile,
    ) -> StoreOutcome {
        if !profile.use_backend_temp_store {
            return self.read_back_size(filename);
        }

        let outcome = if Self::should_chunk(file_size, profile) {
            self.store_chunks(temp_path, filename, profile.chunk_size)
        } else {
            self.store_single(temp_path, filename)
        };

        remove_temp_file(temp_path);
        outcome
    }

    fn read_back_size(&self, filename: &str) -> StoreOutcome {
        match self.store.size(&self.key(filename)) {
            Ok(Some(size)) => {
                metrics::record_bytes_stored(size);
                StoreOutcome::completed(size)
            }
            Ok(None) => {
                error!("Export of {} left no blob in the store", filename);
                StoreOutcome::failed(STORAGE_ERROR)
            }
            Err(e) => {
                error!("Failed to read size of {}: {}", filename, e);
                StoreOutcome::failed(STORAGE_ERROR)
            }
        }
    }

    fn store_single(&self, temp_path: &Path, filename: &str) -> StoreOutcome {
        if let Err(e) = File::open(temp_path) {
            error!("Failed to open {:?}: {}", temp_path, e);
            return StoreOutcome::failed(OPEN_ERROR);
        }
        let key = self.key(filename);
        if let Err(e) = self.store.store_file(&key, temp_path) {
            error!("Failed to store {}: {}", key, e);
            return StoreOutcome::failed(STORAGE_ERROR);
        }
        match self.store.size(&key) {
            Ok(Some(size)) => {
                metrics::record_bytes_stored(size);
                StoreOutcome::completed(size)
            }
            Ok(None) => StoreOutcome::failed(STORAGE_ERROR),
            Err(e) => {
                error!("Failed to read size of {}: {}", key, e);
                StoreOutcome::failed(STORAGE_ERROR)
            }
        }
    }

    fn store_chunks(&self, temp_path: &Path, filename: &str, chunk_size: u64) -> StoreOutcome {
        let mut file = match File::open(temp_path) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to open {:?}: {}", temp_path, e);
                return StoreOutcome::failed(OPEN_ERROR);
            }
        };

        let mut buffer = vec![0u8; chunk_size as usize];
        let mut index = 0u64;
        let mut total = 0u64;
        loop {
            let read = match read_window(&mut file, &mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    error!("Failed reading {:?} at chunk {}: {}", temp_path, index, e);
                    return StoreOutcome::failed(CHUNKING_ERROR);
                }
            };
            let key = self.key(&Self::part_name(filename, index));
            if let Err(e) = self.store.create(&key, &buffer[..read]) {
                error!("Failed to write chunk {}: {}", key, e);
                return StoreOutcome::failed(CHUNKING_ERROR);
            }
            debug!("Stored chunk {} ({} bytes)", key, read);
            metrics::record_chunk_written();
            total += read as u64;
            index += 1;
            if read < buffer.len() {
                break;
            }
        }

        info!("Stored {} as {} chunks, {} bytes", filename, index, total);
        metrics::record_bytes_stored(total);
        StoreOutcome::completed(total)
    }

    /// Keys to stream for a download, in order. Empty when nothing is stored.
    pub fn open_parts(&self, filename: &str) -> BlobResult<Vec<String>> {
        let single = self.key(filename);
        if self.store.exists(&single)? {
            return Ok(vec![single]);
        }
        let mut keys = Vec::new();
        for index in 0.. {
            let key = self.key(&Self::part_name(filename, index));
            if !self.store.exists(&key)? {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Delete every chunk in ascending order up to the first missing index,
    /// then the single blob. Stops at the first failing delete.
    ///
    /// Returns the number of blobs removed.
    pub fn delete_all(&self, filename: &str) -> BlobResult<usize> {
        let mut deleted = 0;
        for index in 0.. {
            let key = self.key(&Self::part_name(filename, index));
            if !self.store.exists(&key)? {
                break;
            }
            self.store.delete(&key)?;
            deleted += 1;
        }
        let single = self.key(filename);
        if self.store.exists(&single)? {
            self.store.delete(&single)?;
            deleted += 1;
        }
        if deleted == 0 {
            warn!("No blobs found for {}", filename);
        }
        Ok(deleted)
    }

    /// Group blob names by the dump they belong to.
    pub fn group_parts(names: &[String]) -> Vec<BlobGroup> {
        let mut singles: BTreeMap<String, bool> = BTreeMap::new();
        let mut parts: BTreeMap<String, BTreeMap<u64, String>> = BTreeMap::new();

        for name in names {
            match PART_RE.captures(name) {
                Some(caps) => {
                    let index = caps[2].parse::<u64>().unwrap_or(u64::MAX);
                    parts
                        .entry(caps[1].to_string())
                        .or_default()
                        .insert(index, name.clone());
                }
                None => {
                    singles.insert(name.clone(), true);
                }
            }
        }

        let mut bases: Vec<String> = singles.keys().chain(parts.keys()).cloned().collect();
        bases.sort();
        bases.dedup();

        bases
            .into_iter()
            .map(|base| {
                let mut members = Vec::new();
                if singles.contains_key(&base) {
                    members.push(base.clone());
                }
                if let Some(chunks) = parts.remove(&base) {
                    members.extend(chunks.into_values());
                }
                BlobGroup { base, members }
            })
            .collect()
    }
}

/// Fill `buffer` from `reader`, short only at EOF.
fn read_window<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Remove a temp export file; a missing file is fine.
pub fn remove_temp_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed temp file {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp file {:?}: {}", path, e),
    }
}
