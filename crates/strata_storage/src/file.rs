//! File-backed journal logs.

use crate::error::{StorageError, StorageResult};
use crate::log::{LogDirectory, LogStorage};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File name extension of journal logs.
pub const LOG_EXTENSION: &str = "journal";

/// A log stored in a single OS file.
///
/// # Durability
///
/// `sync()` calls `File::sync_data()`: appended bytes and the new length are
/// durable when it returns.
///
/// # Example
///
/// ```no_run
/// use strata_storage::{FileLog, LogStorage};
/// use std::path::Path;
///
/// let mut log = FileLog::open(Path::new("0000000000000001.journal")).unwrap();
/// log.append(b"record").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileLog {
    /// Opens or creates a log file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for FileLog {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();
        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::Start(offset))?;
        if let Err(err) = file.write_all(data) {
            // Whatever reached the file is a torn tail; make it visible to
            // the caller's truncate.
            if let Ok(meta) = file.metadata() {
                *size = meta.len();
            }
            return Err(err.into());
        }
        *size += data.len() as u64;
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate log of {} bytes to {} bytes",
                    *size, new_size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }
}

/// A directory of journal logs named `{number:016}.journal`.
///
/// Files that do not match the naming scheme are ignored.
#[derive(Debug, Clone)]
pub struct FileLogDirectory {
    path: PathBuf,
}

impl FileLogDirectory {
    /// Opens a log directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of log `number`.
    #[must_use]
    pub fn log_path(&self, number: u64) -> PathBuf {
        self.path.join(format!("{number:016}.{LOG_EXTENSION}"))
    }

    fn parse_name(name: &str) -> Option<u64> {
        let stem = name.strip_suffix(LOG_EXTENSION)?.strip_suffix('.')?;
        if stem.len() != 16 || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok()
    }
}

impl LogDirectory for FileLogDirectory {
    fn list(&self) -> StorageResult<Vec<u64>> {
        let mut numbers = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(number) = entry.file_name().to_str().and_then(Self::parse_name) {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    fn open(&self, number: u64) -> StorageResult<Box<dyn LogStorage>> {
        Ok(Box::new(FileLog::open(&self.log_path(number))?))
    }

    fn remove(&self, number: u64) -> StorageResult<()> {
        match fs::remove_file(self.log_path(number)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn sync(&self) -> StorageResult<()> {
        sync_directory(&self.path)
    }
}

/// Fsyncs a directory so that file creations and removals in it survive a
/// crash. A no-op on platforms that cannot open directories.
pub fn sync_directory(path: &Path) -> StorageResult<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_append_and_read() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::open(&dir.path().join("a.journal")).unwrap();

        assert_eq!(log.append(b"hello").unwrap(), 0);
        assert_eq!(log.append(b" world").unwrap(), 5);
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.read_at(0, 11).unwrap(), b"hello world");
        assert!(matches!(
            log.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn log_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.journal");
        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"persistent").unwrap();
            log.sync().unwrap();
        }
        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 10);
        assert_eq!(log.read_at(0, 10).unwrap(), b"persistent");
        assert_eq!(log.path(), path);
    }

    #[test]
    fn log_truncate_then_append_overwrites_tail() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::open(&dir.path().join("a.journal")).unwrap();
        log.append(b"good-torn").unwrap();
        log.truncate(4).unwrap();
        log.append(b"!").unwrap();
        assert_eq!(log.read_at(0, 5).unwrap(), b"good!");
        assert!(log.truncate(50).is_err());
    }

    #[test]
    fn directory_lists_only_numbered_logs() {
        let dir = tempdir().unwrap();
        let logs = FileLogDirectory::open(&dir.path().join("journal")).unwrap();
        logs.open(2).unwrap();
        logs.open(10).unwrap();
        logs.open(1).unwrap();
        fs::write(logs.path().join("notes.txt"), b"x").unwrap();
        fs::write(logs.path().join("12.journal"), b"x").unwrap();

        assert_eq!(logs.list().unwrap(), vec![1, 2, 10]);
        assert!(logs.log_path(2).ends_with("0000000000000002.journal"));
    }

    #[test]
    fn directory_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let logs = FileLogDirectory::open(dir.path()).unwrap();
        logs.open(1).unwrap();
        logs.remove(1).unwrap();
        logs.remove(1).unwrap();
        logs.sync().unwrap();
        assert!(logs.list().unwrap().is_empty());
    }
}
