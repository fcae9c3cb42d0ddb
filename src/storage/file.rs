//! File-based key store.
//!
//! Layout:
//! ```text
//! temp/
//! ├── longcat_keys.txt   one key per line
//! └── longcat_keys.csv   one record per row, header on first write
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::LongcatConfig;
use crate::domain::KeyRecord;
use crate::error::{StorageError, StorageResult};
use crate::storage::KeyStore;
use crate::storage::lock::LockedAppend;

/// Append-only key store backed by a text file and a CSV file.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    keys_file: PathBuf,
    csv_path: PathBuf,
}

impl FileKeyStore {
    /// Create a store writing to the given paths.
    #[must_use]
    pub const fn new(keys_file: PathBuf, csv_path: PathBuf) -> Self {
        Self {
            keys_file,
            csv_path,
        }
    }

    /// Create a store from the `[longcat]` section.
    #[must_use]
    pub fn from_config(config: &LongcatConfig) -> Self {
        Self::new(config.keys_file.clone(), config.csv_path.clone())
    }

    /// Path of the plain-text key list.
    #[must_use]
    pub fn keys_file(&self) -> &Path {
        &self.keys_file
    }

    fn append_blocking(&self, record: &KeyRecord) -> StorageResult<()> {
        LockedAppend::open(&self.keys_file)?.append_line(record.key.token.trim())?;

        let mut csv_file = LockedAppend::open(&self.csv_path)?;
        let write_header = csv_file.is_empty()?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(csv_file.writer());
        writer.serialize(record.csv_row())?;
        writer.flush()?;

        Ok(())
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn append(&self, record: &KeyRecord) -> StorageResult<()> {
        let store = self.clone();
        let record = record.clone();

        tokio::task::spawn_blocking(move || store.append_blocking(&record))
            .await
            .map_err(|e| StorageError::FileIO(format!("append task failed: {e}")))?
    }

    async fn read_keys(&self) -> StorageResult<Vec<String>> {
        read_key_lines(&self.keys_file).await
    }
}

/// Non-empty trimmed lines of a key list; a missing file reads as empty.
pub async fn read_key_lines(path: &Path) -> StorageResult<Vec<String>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect())
}
