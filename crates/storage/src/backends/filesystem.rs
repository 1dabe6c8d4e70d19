//! Local filesystem storage backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <key>                          object bytes
//! .attrs/<key>.json              ObjectAttrs sidecar
//! .multipart/<session>/session.json
//! .multipart/<session>/part-00001
//! ```

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, CompletedPart, ObjectAttrs, ObjectMeta, ObjectStore, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use satchel_core::MAX_PART_NUMBER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const MULTIPART_DIR: &str = ".multipart";
const ATTRS_DIR: &str = ".attrs";
const SESSION_MANIFEST: &str = "session.json";

/// Persisted description of an open multipart session.
#[derive(Debug, Serialize, Deserialize)]
struct SessionManifest {
    key: String,
    #[serde(default)]
    attrs: ObjectAttrs,
}

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

fn not_found_or_io(e: std::io::Error, key: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

fn etag_for(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Temp file next to `path`, unique per writer so concurrent writes to the same key don't collide.
fn temp_path_for(path: &Path) -> PathBuf {
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    )
}

/// Whether `key` names an in-flight temp file from `temp_path_for`.
fn is_temp_file(key: &str) -> bool {
    key.rsplit_once(".tmp.")
        .is_some_and(|(_, suffix)| Uuid::parse_str(suffix).is_ok())
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(MULTIPART_DIR)).await?;
        fs::create_dir_all(root.join(ATTRS_DIR)).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// This is an async wrapper around `key_path_sync` that uses `spawn_blocking`
    /// to avoid blocking the Tokio runtime during filesystem operations like
    /// `canonicalize` and `symlink_metadata`.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation with path traversal protection.
    ///
    /// Returns an error if the key would escape the storage root.
    /// This includes protection against symlink-based traversal attacks.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        // Reject keys with obvious path traversal attempts (fast path)
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        // Validate all path components are normal (no .., ., root, etc.).
        // Dot-prefixed names are reserved for staging and attribute sidecars.
        for component in std::path::Path::new(key).components() {
            match component {
                std::path::Component::Normal(name)
                    if !name.to_string_lossy().starts_with('.') => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }

        let path = root.join(key);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // For existing paths (or symlinks, even if broken), canonicalize and verify
        // they don't escape the root. This catches symlink-based traversal attacks
        // where a symlink inside the storage root points to a location outside of it.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }

                // Return the original path (not canonical) to preserve consistency
                // with root in list operations. The security check above ensures
                // the path is safe.
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // For new paths, find the nearest existing ancestor and verify it's within the root.
        // This prevents creating files through symlinked directories, even when intermediate
        // directories don't exist yet. For example: if root/a -> /tmp/out (symlink), and
        // key is "a/b/file", the parent "root/a/b" doesn't exist, but ancestor "root/a"
        // does and would escape the root via symlink.

        // Walk up the path to find the nearest existing ancestor
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {key}"
                        )));
                    }
                    // Found a valid existing ancestor within root
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `data` to `path` via a temp file, fsync, then rename.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.ensure_parent(path).await?;
        let temp_path = temp_path_for(path);
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    /// Sidecar path for a key that already passed `key_path` validation.
    fn attrs_path(&self, key: &str) -> PathBuf {
        self.root.join(ATTRS_DIR).join(format!("{key}.json"))
    }

    async fn read_attrs(&self, key: &str) -> ObjectAttrs {
        match fs::read(self.attrs_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "Ignoring unreadable attribute sidecar");
                ObjectAttrs::default()
            }),
            Err(_) => ObjectAttrs::default(),
        }
    }

    async fn write_attrs(&self, key: &str, attrs: &ObjectAttrs) -> StorageResult<()> {
        let path = self.attrs_path(key);
        if *attrs == ObjectAttrs::default() {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
            return Ok(());
        }
        let raw = serde_json::to_vec(attrs)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        self.write_atomic(&path, &raw).await
    }

    /// Directory for a session ID. IDs are 32 lowercase hex characters.
    fn session_dir(&self, session_id: &str) -> Option<PathBuf> {
        let well_formed = session_id.len() == 32
            && session_id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| self.root.join(MULTIPART_DIR).join(session_id))
    }

    fn part_path(dir: &Path, part_number: u32) -> PathBuf {
        dir.join(format!("part-{part_number:05}"))
    }

    /// Load a session and check it belongs to `key`.
    async fn open_session(&self, key: &str, session_id: &str) -> StorageResult<PathBuf> {
        let dir = self
            .session_dir(session_id)
            .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;
        let raw = fs::read(dir.join(SESSION_MANIFEST)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::SessionNotFound(session_id.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let manifest: SessionManifest = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        if manifest.key != key {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(dir)
    }

    async fn session_attrs(&self, dir: &Path) -> StorageResult<ObjectAttrs> {
        let raw = fs::read(dir.join(SESSION_MANIFEST)).await?;
        let manifest: SessionManifest = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        Ok(manifest.attrs)
    }

    /// Concatenate parts into `temp_path`, verifying each etag.
    async fn assemble(
        &self,
        temp_path: &Path,
        session_dir: &Path,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let mut out = fs::File::create(temp_path).await?;
        for part in parts {
            let data = fs::read(Self::part_path(session_dir, part.part_number))
                .await
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        StorageError::InvalidPart {
                            part_number: part.part_number,
                            reason: "part was never uploaded".to_string(),
                        }
                    } else {
                        StorageError::Io(e)
                    }
                })?;
            if etag_for(&data) != part.etag {
                return Err(StorageError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag does not match the stored part".to_string(),
                });
            }
            out.write_all(&data).await?;
        }
        out.sync_all().await?;
        Ok(())
    }

    /// Walk `dir` and collect file keys relative to the root, skipping reserved entries.
    async fn walk(&self, dir: PathBuf, prefix: &str) -> StorageResult<Vec<String>> {
        let mut results = Vec::new();
        let mut stack = vec![dir];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                // Use file_type() instead of path.is_dir() to avoid following symlinks.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) && !is_temp_file(&key) {
                        results.push(key);
                    }
                }
            }
        }
        results.sort();
        Ok(results)
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: self.read_attrs(key).await.content_type,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(e, key))?;
        let meta = ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
            content_type: self.read_attrs(key).await.content_type,
        };
        Ok(StoredObject {
            data: Bytes::from(data),
            meta,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, key))?;

        // Stream the file in chunks instead of loading entirely into memory
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data, attrs), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, attrs: &ObjectAttrs) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.write_atomic(&path, &data).await?;
        self.write_attrs(key, attrs).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        match fs::remove_file(self.attrs_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Walk the deepest directory fully named by the prefix, then filter.
        let base = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => self.key_path(dir).await?,
            _ => self.root.clone(),
        };
        self.walk(base, prefix).await
    }

    #[instrument(skip(self, attrs), fields(backend = "filesystem"))]
    async fn create_session(&self, key: &str, attrs: &ObjectAttrs) -> StorageResult<String> {
        self.key_path(key).await?;
        let session_id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(MULTIPART_DIR).join(&session_id);
        fs::create_dir_all(&dir).await?;

        let manifest = SessionManifest {
            key: key.to_string(),
            attrs: attrs.clone(),
        };
        let raw = serde_json::to_vec(&manifest)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        self.write_atomic(&dir.join(SESSION_MANIFEST), &raw).await?;

        tracing::debug!(key = %key, session_id = %session_id, "Opened multipart session");
        Ok(session_id)
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidPart {
                part_number,
                reason: format!("part numbers must be between 1 and {MAX_PART_NUMBER}"),
            });
        }
        let dir = self.open_session(key, session_id).await?;
        self.write_atomic(&Self::part_path(&dir, part_number), &data)
            .await?;
        Ok(etag_for(&data))
    }

    #[instrument(skip(self, parts), fields(backend = "filesystem", parts = parts.len()))]
    async fn complete_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let dir = self.open_session(key, session_id).await?;

        let mut ordered = parts.to_vec();
        ordered.sort_by_key(|p| p.part_number);
        if ordered.is_empty() {
            return Err(StorageError::InvalidPart {
                part_number: 0,
                reason: "no parts listed".to_string(),
            });
        }
        if let Some(pair) = ordered
            .windows(2)
            .find(|pair| pair[0].part_number == pair[1].part_number)
        {
            return Err(StorageError::InvalidPart {
                part_number: pair[0].part_number,
                reason: "listed more than once".to_string(),
            });
        }

        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;
        let temp_path = temp_path_for(&path);
        if let Err(e) = self.assemble(&temp_path, &dir, &ordered).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        fs::rename(&temp_path, &path).await?;

        let attrs = self.session_attrs(&dir).await?;
        self.write_attrs(key, &attrs).await?;

        if let Err(e) = fs::remove_dir_all(&dir).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to remove completed session staging");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn abort_session(&self, key: &str, session_id: &str) -> StorageResult<()> {
        let Some(dir) = self.session_dir(session_id) else {
            return Ok(());
        };
        match self.open_session(key, session_id).await {
            Ok(_) => {}
            Err(StorageError::SessionNotFound(_)) => {
                // A surviving manifest means the session belongs to another key.
                if fs::try_exists(dir.join(SESSION_MANIFEST)).await? {
                    return Err(StorageError::SessionNotFound(session_id.to_string()));
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        // Verify the root directory exists and is accessible
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
