//! Test fixtures and environment helpers.
//!
//! Provides convenience functions for setting up test environments
//! and common test scenarios.

use std::path::Path;
use std::sync::Arc;
use strata_core::{Config, StorageEnvironment};
use strata_storage::{MemoryLogDirectory, MemoryPager, Pager};
use tempfile::TempDir;

/// Page size used by the fixtures. Small pages make trees split early.
pub const TEST_PAGE_SIZE: usize = 1024;

/// The storage behind a test environment, kept so it can be reopened.
enum Backing {
    Memory {
        pager: Arc<dyn Pager>,
        journal: MemoryLogDirectory,
    },
    File(TempDir),
}

/// A test environment with automatic cleanup.
pub struct TestEnvironment {
    /// The environment instance.
    pub env: StorageEnvironment,
    config: Config,
    backing: Backing,
}

impl TestEnvironment {
    /// The configuration every fixture starts from.
    pub fn config() -> Config {
        Config::default().page_size(TEST_PAGE_SIZE)
    }

    /// Creates a new in-memory test environment.
    pub fn memory() -> Self {
        Self::memory_with_config(Self::config())
    }

    /// Creates an in-memory test environment with the given configuration.
    pub fn memory_with_config(config: Config) -> Self {
        let pager: Arc<dyn Pager> = Arc::new(MemoryPager::new(config.page_size));
        let journal = MemoryLogDirectory::new();
        let env = StorageEnvironment::open_with_storage(
            config.clone(),
            Arc::clone(&pager),
            Arc::new(journal.clone()),
        )
        .expect("Failed to open in-memory environment");
        Self {
            env,
            config,
            backing: Backing::Memory { pager, journal },
        }
    }

    /// Creates a new file-based test environment in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Self::config())
    }

    /// Creates a file-based test environment with the given configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let env = StorageEnvironment::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open file environment");
        Self {
            env,
            config,
            backing: Backing::File(temp_dir),
        }
    }

    /// Returns the environment directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(dir) => Some(dir.path()),
            Backing::Memory { .. } => None,
        }
    }

    /// Drops the environment without closing it and opens it again over
    /// the same storage, as a process restart after a crash would.
    pub fn reopen(self) -> Self {
        let Self {
            env,
            config,
            backing,
        } = self;
        drop(env);
        let env = match &backing {
            Backing::Memory { pager, journal } => StorageEnvironment::open_with_storage(
                config.clone(),
                Arc::clone(pager),
                Arc::new(journal.clone()),
            ),
            Backing::File(dir) => StorageEnvironment::open_with_config(dir.path(), config.clone()),
        }
        .expect("Failed to reopen environment");
        Self {
            env,
            config,
            backing,
        }
    }

    /// Closes the environment cleanly, then reopens it.
    pub fn close_and_reopen(self) -> Self {
        self.env.close().expect("Failed to close environment");
        self.reopen()
    }
}

impl std::ops::Deref for TestEnvironment {
    type Target = StorageEnvironment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

/// Runs a test with a temporary in-memory environment.
///
/// # Example
///
/// ```rust,ignore
/// use strata_testkit::with_temp_env;
///
/// #[test]
/// fn my_test() {
///     with_temp_env(|env| {
///         env.write(|txn| txn.create_tree("t")?.add(b"k", b"v")).unwrap();
///     });
/// }
/// ```
pub fn with_temp_env<F, R>(f: F) -> R
where
    F: FnOnce(&StorageEnvironment) -> R,
{
    let test_env = TestEnvironment::memory();
    f(&test_env.env)
}

/// Runs a test with a temporary file-based environment.
pub fn with_file_env<F, R>(f: F) -> R
where
    F: FnOnce(&StorageEnvironment, &Path) -> R,
{
    let test_env = TestEnvironment::file();
    let path = test_env
        .path()
        .expect("File environment should have a path")
        .to_path_buf();
    f(&test_env.env, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Key of the `index`th entry written by the scenarios.
    pub fn key(index: usize) -> Vec<u8> {
        format!("key{index:08}").into_bytes()
    }

    /// Value of the `index`th entry written by the scenarios.
    pub fn value(index: usize) -> Vec<u8> {
        format!(r#"{{"index":{index}}}"#).into_bytes()
    }

    /// Creates an environment with `entry_count` entries in tree `test`.
    pub fn populated_environment(entry_count: usize) -> TestEnvironment {
        let test_env = TestEnvironment::memory();
        test_env
            .env
            .write(|txn| {
                let mut tree = txn.create_tree("test")?;
                for i in 0..entry_count {
                    tree.add(&key(i), &value(i))?;
                }
                Ok(())
            })
            .expect("Failed to populate tree");
        test_env
    }

    /// Creates an environment with `tree_count` trees of one entry each.
    pub fn multi_tree_environment(tree_count: usize) -> (TestEnvironment, Vec<String>) {
        let test_env = TestEnvironment::memory();
        let mut names = Vec::with_capacity(tree_count);

        for i in 0..tree_count {
            let name = format!("tree_{i}");
            test_env
                .env
                .write(|txn| txn.create_tree(&name)?.add(&key(i), &value(i)))
                .expect("Failed to create tree");
            names.push(name);
        }

        (test_env, names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_environment() {
        let test_env = TestEnvironment::memory();
        assert!(test_env.path().is_none());
        assert!(test_env.tree_names().unwrap().is_empty());
    }

    #[test]
    fn test_with_temp_env() {
        with_temp_env(|env| {
            env.write(|txn| txn.create_tree("test")?.add(b"k", b"v"))
                .unwrap();
            assert_eq!(env.tree_names().unwrap(), ["test"]);
        });
    }

    #[test]
    fn test_with_file_env() {
        with_file_env(|env, path| {
            assert_eq!(env.path(), Some(path));
        });
    }

    #[test]
    fn test_populated_scenario() {
        let test_env = scenarios::populated_environment(10);
        let len = test_env
            .read(|txn| Ok(txn.open_tree("test")?.map_or(0, |t| t.len())))
            .unwrap();
        assert_eq!(len, 10);
    }

    #[test]
    fn test_reopen_keeps_data() {
        for test_env in [TestEnvironment::memory(), TestEnvironment::file()] {
            test_env
                .write(|txn| txn.create_tree("t")?.add(b"k", b"v"))
                .unwrap();
            let test_env = test_env.reopen();
            let value = test_env
                .read(|txn| txn.open_tree("t")?.expect("tree exists").read(b"k"))
                .unwrap();
            assert_eq!(value, Some(b"v".to_vec()));
            let test_env = test_env.close_and_reopen();
            assert_eq!(test_env.recovery_report().replayed, 0);
        }
    }
}
