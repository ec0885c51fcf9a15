//! Store abstraction for Mirante's persistent state.
//!
//! A Store is the directory holding the indicator database, the broker
//! audit log, and the per-version raw dataset exports.

use std::path::{Path, PathBuf};

pub const STORE_DIR: &str = ".mirante/data";
pub const DATASETS_DIR: &str = "datasets";

/// Store handle representing a Mirante state workspace.
///
/// All engine state (source collections, reference entities, indicator
/// versions, scheduled tasks) is scoped to a store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

impl Store {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the store rooted under `base` (typically the working
    /// directory), without touching the filesystem.
    pub fn under(base: &Path) -> Self {
        Self {
            root: base.join(STORE_DIR),
        }
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join(DATASETS_DIR)
    }

    /// Path of the raw dataset export for one indicator version.
    pub fn dataset_path(&self, indicator_id: &str) -> PathBuf {
        self.datasets_dir().join(format!("{}.jsonl", indicator_id))
    }
}
