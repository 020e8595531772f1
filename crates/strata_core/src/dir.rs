//! Environment directory management.
//!
//! This module handles the file system layout of a durable environment:
//!
//! ```text
//! <env_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ data.strata       # Page file (memory-mapped)
//! └─ journal/          # Numbered journal files
//!    ├─ 0000000000000001.journal
//!    └─ ...
//! ```
//!
//! The LOCK file ensures only one process opens the environment at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DATA_FILE: &str = "data.strata";
const JOURNAL_DIR: &str = "journal";

/// Holds the environment directory and its exclusive lock.
///
/// Only one `EnvironmentDir` can exist per directory at a time, across
/// processes. The lock is released when the value is dropped.
#[derive(Debug)]
pub struct EnvironmentDir {
    path: PathBuf,
    _lock_file: File,
}

impl EnvironmentDir {
    /// Opens or creates an environment directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `EnvironmentLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "environment directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::EnvironmentLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the environment directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the page file.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    /// Returns the path of the journal directory.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_DIR)
    }

    /// Returns true if no page file has been created yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        !self.data_path().exists()
    }
}
