//! Storage layer module.
//!
//! Keys are persisted through the [`KeyStore`] trait so the workflow can be
//! exercised against an in-memory store in tests.

pub mod file;
pub mod lock;

use async_trait::async_trait;

use crate::domain::KeyRecord;
use crate::error::StorageResult;

pub use file::{FileKeyStore, read_key_lines};
pub use lock::LockedAppend;

/// Append-only key persistence.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Append one record. Existing content is never rewritten.
    async fn append(&self, record: &KeyRecord) -> StorageResult<()>;

    /// All keys persisted so far, in write order.
    async fn read_keys(&self) -> StorageResult<Vec<String>>;
}
