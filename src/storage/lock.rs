//! Exclusive append handles.
//!
//! Uses file locks (flock) so concurrent writers, including other processes,
//! never interleave partial lines.
//! Note: File locks may not work correctly on all network filesystems.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

use crate::error::{StorageError, StorageResult};

/// An append-mode file held under an exclusive lock until dropped.
#[derive(Debug)]
pub struct LockedAppend {
    file: File,
}

impl LockedAppend {
    /// Open (creating parents and the file as needed) and lock `path`.
    ///
    /// Blocks until the lock is available; call from a blocking context.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::FileIO(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        file.lock_exclusive()
            .map_err(|e| StorageError::LockFailed(format!("{}: {e}", path.display())))?;

        Ok(Self { file })
    }

    /// Whether nothing has been written to the file yet.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.file.metadata()?.len() == 0)
    }

    /// Append one line terminated by `\n`.
    pub fn append_line(&mut self, line: &str) -> StorageResult<()> {
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }

    /// Mutable access for structured writers.
    pub const fn writer(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for LockedAppend {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/keys.txt");

        let mut handle = LockedAppend::open(&path).unwrap();
        assert!(handle.is_empty().unwrap());
        handle.append_line("one").unwrap();
        drop(handle);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\n");
    }

    #[test]
    fn test_lock_is_held_until_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keys.txt");

        let handle = LockedAppend::open(&path).unwrap();
        let other = File::open(&path).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(handle);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
