//! Job registry persistence.
//!
//! The scheduler writes the complete registry after every mutation and reads
//! it back once at startup. [`JsonFileStore`] is the production store;
//! [`MemoryStore`] keeps the snapshot in memory for tests and embedders that
//! don't want a file.
//!
//! The file format is a pretty-printed JSON object mapping job id to job:
//!
//! ```json
//! {
//!   "0190c5a4-...": {
//!     "id": "0190c5a4-...",
//!     "name": "Morning run",
//!     "script": "lights on\nspeed 30\nwait 10\nspeed 0",
//!     "cron_expression": "0 8 * * *",
//!     "enabled": true,
//!     ...
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::scheduler::ScheduledJob;

/// Id-ordered job registry.
pub type JobMap = BTreeMap<String, ScheduledJob>;

/// Loads and saves the job registry.
pub trait JobStore: Send + Sync + 'static {
    /// Read the stored registry. A store that was never written is empty.
    fn load(&self) -> Result<JobMap, StoreError>;

    /// Replace the stored registry with `jobs`.
    fn save(&self, jobs: &JobMap) -> Result<(), StoreError>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Registry stored as one JSON file.
///
/// Saves go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "jobs.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl JobStore for JsonFileStore {
    fn load(&self) -> Result<JobMap, StoreError> {
        if !self.path.exists() {
            return Ok(JobMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(JobMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, jobs: &JobMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(jobs)?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory registry snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<JobMap>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `jobs`.
    pub fn with_jobs(jobs: JobMap) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved snapshot.
    pub fn snapshot(&self) -> JobMap {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl JobStore for MemoryStore {
    fn load(&self) -> Result<JobMap, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, jobs: &JobMap) -> Result<(), StoreError> {
        *self.jobs.lock().unwrap_or_else(|e| e.into_inner()) = jobs.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
