//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Attributes stored alongside an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// MIME type returned on reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Free-form string metadata (S3 user metadata).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectAttrs {
    /// Attributes carrying only a content type.
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            metadata: BTreeMap::new(),
        }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// An object read fully into memory.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub meta: ObjectMeta,
}

/// A part the caller wants kept when completing a multipart session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number (1-based).
    pub part_number: u32,
    /// Etag returned by `upload_part` for this part.
    pub etag: String,
}

/// Object store abstraction.
///
/// Implementations perform no retries; every failure is returned to the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and attributes without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content and metadata.
    async fn get(&self, key: &str) -> StorageResult<StoredObject>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically, replacing any existing object at `key`.
    async fn put(&self, key: &str, data: Bytes, attrs: &ObjectAttrs) -> StorageResult<()>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List object keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Open a multipart session that will eventually write `key`.
    ///
    /// Returns an opaque session ID.
    async fn create_session(&self, key: &str, attrs: &ObjectAttrs) -> StorageResult<String>;

    /// Upload one part of a session and return its etag.
    ///
    /// Parts may arrive in any order. Uploading the same part number again
    /// replaces the earlier upload of that part.
    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Assemble the listed parts into the final object and close the session.
    ///
    /// Parts are concatenated in ascending part number regardless of the
    /// order given. Each etag must match the stored part.
    async fn complete_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Discard a session and its parts. Aborting an unknown session succeeds.
    async fn abort_session(&self, key: &str, session_id: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup to ensure the storage is available before
    /// accepting requests. The default implementation returns Ok(()).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
