//! Local ledger of keys already imported into gpt-load.
//!
//! One SHA-256 hex digest per line; raw keys are never written here.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

/// Hex SHA-256 of a key.
#[must_use]
pub fn key_hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Ledger file for one gpt-load group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLedger {
    path: PathBuf,
}

impl SyncLedger {
    /// Ledger at an explicit path.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `state_file` when given, else `temp/gpt_load_synced_<group>.sha256`.
    #[must_use]
    pub fn for_group(group_name: &str, state_file: Option<&Path>) -> Self {
        match state_file.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => Self::new(path.to_path_buf()),
            None => Self::new(
                PathBuf::from("temp").join(format!(
                    "gpt_load_synced_{}.sha256",
                    sanitize_group(group_name)
                )),
            ),
        }
    }

    /// Ledger path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Digests recorded so far; unreadable or missing ledgers are empty.
    pub async fn load(&self) -> HashSet<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(ToString::to_string)
                .collect(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Sync ledger unreadable");
                }
                HashSet::new()
            }
        }
    }

    /// Append digests.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the ledger cannot be written.
    pub async fn append(&self, hashes: &[String]) -> std::io::Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut buf = String::new();
        for hash in hashes {
            buf.push_str(hash.trim());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes()).await?;
        file.flush().await
    }
}

/// Group name reduced to `[A-Za-z0-9._-]`, leading `#` dropped.
fn sanitize_group(group_name: &str) -> String {
    let trimmed = group_name.trim();
    let name = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "group".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_key_hash() {
        assert_eq!(
            key_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_default_path_per_group() {
        let ledger = SyncLedger::for_group("#pinhaofan", None);
        assert_eq!(
            ledger.path(),
            Path::new("temp/gpt_load_synced_pinhaofan.sha256")
        );

        let ledger = SyncLedger::for_group("my group/1", None);
        assert_eq!(
            ledger.path(),
            Path::new("temp/gpt_load_synced_my_group_1.sha256")
        );

        assert_eq!(sanitize_group("#"), "group");

        let ledger = SyncLedger::for_group("x", Some(Path::new("/tmp/custom.sha256")));
        assert_eq!(ledger.path(), Path::new("/tmp/custom.sha256"));
    }

    #[tokio::test]
    async fn test_append_then_load() {
        let temp = TempDir::new().unwrap();
        let ledger = SyncLedger::new(temp.path().join("state/ledger.sha256"));

        assert!(ledger.load().await.is_empty());

        ledger.append(&[key_hash("k1"), key_hash("k2")]).await.unwrap();
        ledger.append(&[key_hash("k3")]).await.unwrap();

        let hashes = ledger.load().await;
        assert_eq!(hashes.len(), 3);
        assert!(hashes.contains(&key_hash("k2")));
    }
}
