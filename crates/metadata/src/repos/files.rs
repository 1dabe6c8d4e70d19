//! Standalone file repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for standalone file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a file record. Fails with `AlreadyExists` if the storage key is taken.
    async fn create_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Get a file by ID.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>>;

    /// Get a file by its storage key.
    async fn get_file_by_key(&self, storage_key: &str) -> MetadataResult<Option<FileRow>>;

    /// Delete a file record, returning the number of rows removed.
    ///
    /// Zero means a concurrent caller got there first.
    async fn delete_file(&self, file_id: Uuid) -> MetadataResult<u64>;

    /// Files whose expiry is at or before `now`. Permanent files are never returned.
    async fn get_expired_files(&self, now: i64) -> MetadataResult<Vec<FileRow>>;
}
