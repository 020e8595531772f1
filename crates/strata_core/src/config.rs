//! Environment configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::{lexicographic, Comparer};

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 1024;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Which pager backs the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerKind {
    /// Memory-mapped data file in the environment directory.
    Durable,
    /// Heap pages; nothing survives the process.
    InMemory,
}

/// Configuration for opening an environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the environment if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the environment already exists.
    pub error_if_exists: bool,

    /// Page size in bytes. A power of two between 1 KiB and 64 KiB.
    /// Fixed when the environment is created.
    pub page_size: usize,

    /// Size of a new data file.
    pub initial_size: u64,

    /// How much the data file grows by when it runs out of pages.
    pub growth_increment: u64,

    /// Upper bound on the data file size, if any.
    pub max_size: Option<u64>,

    /// Size at which the journal rotates to a new file.
    pub journal_file_size: u64,

    /// Journal bytes written since the last checkpoint that trigger an
    /// automatic checkpoint after commit (0 = never).
    pub checkpoint_threshold: u64,

    /// Whether to fsync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Pager selection.
    pub pager: PagerKind,

    /// Key order of user trees. Must be the same on every open.
    pub comparer: Comparer,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            page_size: 4096,
            initial_size: 64 * 1024,            // 64 KB
            growth_increment: 1024 * 1024,      // 1 MB
            max_size: None,
            journal_file_size: 16 * 1024 * 1024,    // 16 MB
            checkpoint_threshold: 64 * 1024 * 1024, // 64 MB
            sync_on_commit: true,
            pager: PagerKind::Durable,
            comparer: lexicographic,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the environment if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the environment exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the initial data file size.
    #[must_use]
    pub const fn initial_size(mut self, size: u64) -> Self {
        self.initial_size = size;
        self
    }

    /// Sets the data file growth increment.
    #[must_use]
    pub const fn growth_increment(mut self, size: u64) -> Self {
        self.growth_increment = size;
        self
    }

    /// Caps the data file size.
    #[must_use]
    pub const fn max_size(mut self, size: u64) -> Self {
        self.max_size = Some(size);
        self
    }

    /// Sets the journal rotation size.
    #[must_use]
    pub const fn journal_file_size(mut self, size: u64) -> Self {
        self.journal_file_size = size;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn checkpoint_threshold(mut self, size: u64) -> Self {
        self.checkpoint_threshold = size;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Selects the pager.
    #[must_use]
    pub const fn pager(mut self, kind: PagerKind) -> Self {
        self.pager = kind;
        self
    }

    /// Installs a key order for user trees.
    #[must_use]
    pub const fn comparer(mut self, comparer: Comparer) -> Self {
        self.comparer = comparer;
        self
    }

    /// Page count of a new data file.
    pub(crate) fn initial_pages(&self) -> u64 {
        self.initial_size.div_ceil(self.page_size as u64).max(1)
    }

    /// Pages added per growth step.
    pub(crate) fn growth_pages(&self) -> u64 {
        self.growth_increment.div_ceil(self.page_size as u64).max(1)
    }

    /// Page limit derived from `max_size`.
    pub(crate) fn max_pages(&self) -> Option<u64> {
        self.max_size.map(|size| size / self.page_size as u64)
    }

    /// Checks the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(CoreError::invalid_config(format!(
                "page size {} must be a power of two between {} and {}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.growth_increment == 0 {
            return Err(CoreError::invalid_config("growth increment must be non-zero"));
        }
        if self.journal_file_size == 0 {
            return Err(CoreError::invalid_config("journal file size must be non-zero"));
        }
        if let Some(max) = self.max_size {
            // Header page plus the two internal tree roots.
            let floor = 3 * self.page_size as u64;
            if max < floor {
                return Err(CoreError::invalid_config(format!(
                    "max size {max} is below the minimum of {floor} bytes"
                )));
            }
            if max < self.initial_size {
                return Err(CoreError::invalid_config(format!(
                    "max size {max} is below the initial size {}",
                    self.initial_size
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.error_if_exists);
        assert!(config.sync_on_commit);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.pager, PagerKind::Durable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .page_size(8192)
            .journal_file_size(1024)
            .max_size(1 << 20);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.journal_file_size, 1024);
        assert_eq!(config.max_pages(), Some(128));
    }

    #[test]
    fn page_counts_round_up() {
        let config = Config::new()
            .page_size(4096)
            .initial_size(5000)
            .growth_increment(1);
        assert_eq!(config.initial_pages(), 2);
        assert_eq!(config.growth_pages(), 1);
    }

    #[test]
    fn rejects_bad_page_sizes() {
        for size in [0, 512, 3000, 128 * 1024] {
            let err = Config::new().page_size(size).validate().unwrap_err();
            assert!(matches!(err, CoreError::InvalidConfig { .. }), "{size}");
        }
        assert!(Config::new().page_size(1024).validate().is_ok());
        assert!(Config::new().page_size(65536).validate().is_ok());
    }

    #[test]
    fn rejects_tiny_max_size() {
        let err = Config::new()
            .initial_size(4096)
            .max_size(4096)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }
}
