//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, GroupItemRow, UploadSessionRow};
use async_trait::async_trait;
use satchel_core::UploadState;
use uuid::Uuid;

/// Repository for the chunked upload registry.
#[async_trait]
pub trait UploadSessionRepo: Send + Sync {
    /// Record a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Move a session to `to` if its current state is one of `from`.
    ///
    /// Returns `false` when the session is missing or in another state. The
    /// check and the write happen in one statement, so two racing callers
    /// cannot both win.
    async fn transition_state(
        &self,
        upload_id: Uuid,
        from: &[UploadState],
        to: UploadState,
        updated_at: i64,
    ) -> MetadataResult<bool>;

    /// Mark a `completing` session completed and insert its file record.
    ///
    /// Both writes commit together or not at all.
    async fn commit_file(
        &self,
        upload_id: Uuid,
        file: &FileRow,
        updated_at: i64,
    ) -> MetadataResult<()>;

    /// Mark a `completing` session completed and insert its group item.
    async fn commit_group_item(
        &self,
        upload_id: Uuid,
        item: &GroupItemRow,
        updated_at: i64,
    ) -> MetadataResult<()>;

    /// Sessions whose own expiry is at or before `now`, in any state.
    async fn get_expired_sessions(&self, now: i64) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Delete a session entry, returning the number of rows removed.
    async fn delete_session(&self, upload_id: Uuid) -> MetadataResult<u64>;
}
