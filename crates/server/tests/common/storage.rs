//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use satchel_storage::{
    ByteStream, CompletedPart, ObjectAttrs, ObjectMeta, ObjectStore, StorageError,
    StorageResult, StoredObject,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// An object store that delegates to another store but can be told to fail.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FailingStore {
    inner: Arc<dyn ObjectStore>,
    fail_delete: Mutex<HashSet<String>>,
    fail_complete: AtomicBool,
}

#[allow(dead_code)]
impl FailingStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            fail_delete: Mutex::new(HashSet::new()),
            fail_complete: AtomicBool::new(false),
        }
    }

    /// Make every delete of `key` fail.
    pub fn fail_delete_of(&self, key: &str) {
        self.fail_delete.lock().unwrap().insert(key.to_string());
    }

    /// Let deletes of `key` through again.
    pub fn allow_delete_of(&self, key: &str) {
        self.fail_delete.lock().unwrap().remove(key);
    }

    /// Make `complete_session` fail with an I/O error.
    pub fn fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("injected {what} failure")))
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes, attrs: &ObjectAttrs) -> StorageResult<()> {
        self.inner.put(key, data, attrs).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_delete.lock().unwrap().contains(key) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn create_session(&self, key: &str, attrs: &ObjectAttrs) -> StorageResult<String> {
        self.inner.create_session(key, attrs).await
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        self.inner
            .upload_part(key, session_id, part_number, data)
            .await
    }

    async fn complete_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(Self::injected("complete"));
        }
        self.inner.complete_session(key, session_id, parts).await
    }

    async fn abort_session(&self, key: &str, session_id: &str) -> StorageResult<()> {
        self.inner.abort_session(key, session_id).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
