use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::MaintenanceError;

pub const LOCK_FILE_NAME: &str = ".maintenance.lock";
const DEFAULT_STALE_LOCK_SECS: i64 = 6 * 60 * 60; // 6 hours

/// Contents of the lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: String,
    task: String,
}

impl LockEntry {
    fn describe(&self) -> String {
        format!(
            "{} (pid {} on {}, since {})",
            self.task, self.pid, self.hostname, self.time
        )
    }
}

/// Exclusive lock held while a maintenance task runs. Released on drop.
#[derive(Debug)]
pub struct MaintenanceLock {
    path: PathBuf,
}

impl MaintenanceLock {
    /// Take the lock in `dir`, failing fast if another task holds it.
    ///
    /// A lock older than six hours is assumed to belong to a killed process
    /// and is broken.
    pub fn acquire(dir: &Path, task: &str) -> Result<Self, MaintenanceError> {
        Self::acquire_with_stale_after(dir, task, Duration::seconds(DEFAULT_STALE_LOCK_SECS))
    }

    pub fn acquire_with_stale_after(
        dir: &Path,
        task: &str,
        stale_after: Duration,
    ) -> Result<Self, MaintenanceError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        match Self::create(&path, task) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let holder = read_entry(&path);
        let stale = match &holder {
            Some(entry) => chrono::DateTime::parse_from_rfc3339(&entry.time)
                .map(|t| Utc::now().signed_duration_since(t.with_timezone(&Utc)) > stale_after)
                .unwrap_or(true),
            // Unreadable lock files are leftovers of a crash mid-write
            None => true,
        };
        if !stale {
            let holder = holder.map(|h| h.describe()).unwrap_or_default();
            return Err(MaintenanceError::AlreadyRunning(holder));
        }

        warn!("Breaking stale maintenance lock {:?}", path);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match Self::create(&path, task) {
            Ok(lock) => Ok(lock),
            // Someone else broke it first
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(
                MaintenanceError::AlreadyRunning(read_entry(&path).map(|h| h.describe()).unwrap_or_default()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn create(path: &Path, task: &str) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let entry = LockEntry {
            hostname: hostname(),
            pid: std::process::id(),
            time: Utc::now().to_rfc3339(),
            task: task.to_string(),
        };
        let data = serde_json::to_vec(&entry).map_err(io::Error::other)?;
        file.write_all(&data)?;
        file.sync_all()?;
        debug!("Acquired maintenance lock {:?} for {}", path, task);
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for MaintenanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release maintenance lock {:?}: {}", self.path, e);
        }
    }
}

fn read_entry(path: &Path) -> Option<LockEntry> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
