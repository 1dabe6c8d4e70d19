//! Upload orchestration: chunked sessions, single-request uploads, and owner deletes.
//!
//! A chunked upload moves through
//! `created -> parts_in_progress -> completing -> completed`. It can also leave
//! an active state for `aborted` (owner abort) or `completing` for `failed`
//! (the backend refused to assemble). Metadata for a file is written only
//! after the object store confirms the object exists.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BYTES_UPLOADED, DIRECT_UPLOADS, PART_UPLOAD_DURATION, PARTS_UPLOADED,
    UPLOAD_COMPLETE_DURATION, UPLOAD_SESSIONS_ABORTED, UPLOAD_SESSIONS_COMPLETED,
    UPLOAD_SESSIONS_CREATED, UPLOAD_SESSIONS_FAILED, record_upload_error,
};
use crate::sweeper::{purge_file, purge_group};
use bytes::Bytes;
use satchel_core::config::LimitsConfig;
use satchel_core::group::{CreateGroupRequest, CreateGroupResponse};
use satchel_core::upload::{
    CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
    ItemKind, PartReceipt, check_part_set,
};
use satchel_core::{FileId, GroupId, ItemId, MAX_PART_NUMBER, UploadId, UploadState, key};
use satchel_metadata::MetadataError;
use satchel_metadata::MetadataStore;
use satchel_metadata::models::{FileRow, GroupItemRow, GroupRow, UploadSessionRow};
use satchel_storage::{CompletedPart, ObjectAttrs, ObjectStore, StorageError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

/// Longest display name accepted, in bytes.
pub const MAX_DISPLAY_NAME_LEN: usize = 1024;

/// Object metadata key recording the uploading user.
const OWNER_ATTR: &str = "owner";

/// Parameters of a single-request upload.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DirectUpload {
    /// Display name of the file.
    pub name: String,
    /// MIME type recorded for downloads.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Upload into this group instead of as a standalone file.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Seconds until the file expires. Ignored for group items.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Current time as Unix seconds.
pub(crate) fn now_secs() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Whether a nullable expiry has passed at `now`.
pub(crate) fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    expires_at.is_some_and(|exp| exp <= now)
}

fn expiry_from(now: i64, expires_in: Option<u64>) -> ApiResult<Option<i64>> {
    match expires_in {
        None => Ok(None),
        Some(0) => Err(ApiError::Validation(
            "expires_in must be greater than 0".to_string(),
        )),
        Some(secs) => i64::try_from(secs)
            .ok()
            .and_then(|secs| now.checked_add(secs))
            .map(Some)
            .ok_or_else(|| ApiError::Validation(format!("expires_in {secs} is too large"))),
    }
}

fn validate_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("name cannot be empty".to_string()));
    }
    if name.len() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "name exceeds {MAX_DISPLAY_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ApiError::Validation(
            "name cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

fn to_db_size(value: u64, field: &str) -> ApiResult<i64> {
    i64::try_from(value).map_err(|_| {
        ApiError::Validation(format!(
            "{field} {value} exceeds maximum supported size {}",
            i64::MAX
        ))
    })
}

fn object_attrs(owner: &str, content_type: Option<&str>) -> ObjectAttrs {
    ObjectAttrs {
        content_type: content_type.map(str::to_string),
        metadata: BTreeMap::from([(OWNER_ATTR.to_string(), owner.to_string())]),
    }
}

/// Map a failed metadata insert. A foreign key failure on a group item means
/// the group vanished while the upload was in flight.
fn insert_error(err: MetadataError, group_id: Option<GroupId>) -> ApiError {
    match (err, group_id) {
        (MetadataError::Constraint(_), Some(group_id)) => {
            ApiError::MetadataMissing(format!("group {group_id}"))
        }
        (err, _) => err.into(),
    }
}

/// Coordinates the object store and metadata store for every write path.
pub struct UploadOrchestrator {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    limits: LimitsConfig,
}

impl UploadOrchestrator {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            limits,
        }
    }

    /// Upload limits in effect.
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Resolve an optional target group, checking that `owner` owns it and
    /// that it has not expired.
    async fn resolve_group(
        &self,
        owner: &str,
        group_id: Option<&str>,
        now: i64,
    ) -> ApiResult<Option<GroupRow>> {
        let Some(raw) = group_id else {
            return Ok(None);
        };
        let group_id = GroupId::parse(raw)?;
        let group = self
            .metadata
            .get_group(*group_id.as_uuid())
            .await?
            .filter(|group| !is_expired(group.expires_at, now))
            .ok_or_else(|| ApiError::MetadataMissing(format!("group {group_id}")))?;
        if group.owner_id != owner {
            return Err(ApiError::OwnershipViolation(format!("group {group_id}")));
        }
        Ok(Some(group))
    }

    async fn load_session(
        &self,
        owner: &str,
        upload_id: &UploadId,
    ) -> ApiResult<(UploadSessionRow, UploadState)> {
        let session = self
            .metadata
            .get_session(*upload_id.as_uuid())
            .await?
            .ok_or_else(|| ApiError::MetadataMissing(format!("upload {upload_id}")))?;
        if session.owner_id != owner {
            return Err(ApiError::OwnershipViolation(format!("upload {upload_id}")));
        }
        let state = UploadState::parse(&session.state)
            .map_err(|e| ApiError::Internal(format!("upload {upload_id}: {e}")))?;
        Ok((session, state))
    }

    /// Load a session that can still take parts or be completed.
    async fn load_active_session(
        &self,
        owner: &str,
        upload_id: &UploadId,
        now: i64,
    ) -> ApiResult<UploadSessionRow> {
        let (session, state) = self.load_session(owner, upload_id).await?;
        if session.expires_at <= now {
            return Err(ApiError::MetadataMissing(format!(
                "upload {upload_id} has expired"
            )));
        }
        if !state.is_active() {
            return Err(ApiError::Conflict(format!("upload {upload_id} is {state}")));
        }
        Ok(session)
    }

    /// Start a chunked upload.
    #[tracing::instrument(skip(self, req), fields(name = %req.name, total_chunks = req.total_chunks))]
    pub async fn init(&self, owner: &str, req: &InitUploadRequest) -> ApiResult<InitUploadResponse> {
        validate_name(&req.name)?;
        if req.total_chunks == 0 || req.total_chunks > MAX_PART_NUMBER {
            return Err(ApiError::Validation(format!(
                "total_chunks must be between 1 and {MAX_PART_NUMBER}"
            )));
        }
        if req.size > self.limits.max_file_bytes {
            record_upload_error("file_too_large");
            return Err(ApiError::PayloadTooLarge {
                limit: self.limits.max_file_bytes,
            });
        }
        let declared_size = to_db_size(req.size, "size")?;

        let now = now_secs();
        let group = self.resolve_group(owner, req.group_id.as_deref(), now).await?;
        let group_id = group.as_ref().map(|g| GroupId::from_uuid(g.group_id));
        let file_expires_at = match group_id {
            Some(_) => None,
            None => expiry_from(now, req.expires_in)?,
        };

        let storage_key = match &group_id {
            Some(group_id) => key::group_item_key(group_id, &req.name),
            None => key::file_key(owner, &req.name),
        };
        let attrs = object_attrs(owner, req.content_type.as_deref());
        let backend_session_id = self.storage.create_session(&storage_key, &attrs).await?;

        let upload_id = UploadId::new();
        let expires_at = now.saturating_add(to_db_size(self.limits.session_ttl_secs, "session_ttl")?);
        let row = UploadSessionRow {
            upload_id: *upload_id.as_uuid(),
            owner_id: owner.to_string(),
            storage_key: storage_key.clone(),
            backend_session_id: backend_session_id.clone(),
            group_id: group_id.map(|id| *id.as_uuid()),
            declared_name: req.name.clone(),
            declared_size,
            total_chunks: i64::from(req.total_chunks),
            content_type: req.content_type.clone(),
            file_expires_at,
            state: UploadState::Created.as_str().to_string(),
            created_at: now,
            updated_at: now,
            expires_at,
        };

        if let Err(e) = self.metadata.create_session(&row).await {
            if let Err(abort_err) = self
                .storage
                .abort_session(&storage_key, &backend_session_id)
                .await
            {
                tracing::warn!(
                    storage_key = %storage_key,
                    error = %abort_err,
                    "Failed to abort backend session after registry insert failed"
                );
            }
            return Err(e.into());
        }

        UPLOAD_SESSIONS_CREATED.inc();
        tracing::info!(
            upload_id = %upload_id,
            owner = %owner,
            storage_key = %storage_key,
            "Created upload session"
        );

        Ok(InitUploadResponse {
            upload_id: upload_id.to_string(),
            storage_key,
            max_chunk_bytes: self.limits.max_chunk_bytes,
            expires_at,
        })
    }

    /// Store one part of a chunked upload.
    ///
    /// Oversized parts are rejected before anything else is looked up.
    #[tracing::instrument(skip(self, upload_id, data), fields(upload_id = %upload_id, size = data.len()))]
    pub async fn upload_part(
        &self,
        owner: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> ApiResult<PartReceipt> {
        let size = data.len() as u64;
        if size > self.limits.max_chunk_bytes {
            record_upload_error("chunk_too_large");
            return Err(ApiError::PayloadTooLarge {
                limit: self.limits.max_chunk_bytes,
            });
        }

        let now = now_secs();
        let session = self.load_active_session(owner, upload_id, now).await?;
        if part_number == 0 || i64::from(part_number) > session.total_chunks {
            return Err(ApiError::Validation(format!(
                "part number {part_number} outside 1..={}",
                session.total_chunks
            )));
        }

        let start = Instant::now();
        let etag = self
            .storage
            .upload_part(
                &session.storage_key,
                &session.backend_session_id,
                part_number,
                data,
            )
            .await
            .map_err(|e| {
                record_upload_error("part_store");
                ApiError::from(e)
            })?;
        PART_UPLOAD_DURATION.observe(start.elapsed().as_secs_f64());
        PARTS_UPLOADED.inc();
        BYTES_UPLOADED.inc_by(size);

        let moved = self
            .metadata
            .transition_state(
                *upload_id.as_uuid(),
                &[UploadState::Created, UploadState::PartsInProgress],
                UploadState::PartsInProgress,
                now,
            )
            .await?;
        if !moved {
            tracing::debug!(upload_id = %upload_id, "Session left the active state during part upload");
        }

        Ok(PartReceipt { part_number, etag })
    }

    /// Assemble a chunked upload and record the result.
    #[tracing::instrument(skip(self, upload_id, req), fields(upload_id = %upload_id, parts = req.parts.len()))]
    pub async fn complete(
        &self,
        owner: &str,
        upload_id: &UploadId,
        req: &CompleteUploadRequest,
    ) -> ApiResult<CompleteUploadResponse> {
        let now = now_secs();
        let session = self.load_active_session(owner, upload_id, now).await?;
        if let Some(name) = &req.name {
            validate_name(name)?;
        }

        let total = u32::try_from(session.total_chunks)
            .map_err(|_| ApiError::Internal(format!("upload {upload_id}: bad total_chunks")))?;
        let numbers: Vec<u32> = req.parts.iter().map(|p| p.part_number).collect();
        check_part_set(&numbers, total).map_err(ApiError::IncompletePartSet)?;

        let claimed = self
            .metadata
            .transition_state(
                *upload_id.as_uuid(),
                &[UploadState::Created, UploadState::PartsInProgress],
                UploadState::Completing,
                now,
            )
            .await?;
        if !claimed {
            return Err(ApiError::Conflict(format!(
                "upload {upload_id} is already being completed or was aborted"
            )));
        }

        let start = Instant::now();
        let parts: Vec<CompletedPart> = req
            .parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        if let Err(e) = self
            .storage
            .complete_session(&session.storage_key, &session.backend_session_id, &parts)
            .await
        {
            return Err(self.fail_assembly(upload_id, e).await);
        }

        let meta = match self.storage.head(&session.storage_key).await {
            Ok(meta) => meta,
            Err(e) => {
                self.mark_failed(upload_id).await;
                return Err(ApiError::AdapterFailure(e.to_string()));
            }
        };

        let expected = req
            .size
            .unwrap_or(u64::try_from(session.declared_size).unwrap_or_default());
        if meta.size != expected {
            tracing::warn!(
                upload_id = %upload_id,
                expected,
                actual = meta.size,
                "Assembled size differs from the declared size, recording the actual size"
            );
        }
        let size = to_db_size(meta.size, "size")?;
        let name = req
            .name
            .clone()
            .unwrap_or_else(|| session.declared_name.clone());
        let committed_at = now_secs();
        let group_id = session.group_id.map(GroupId::from_uuid);

        let committed = match group_id {
            Some(group_id) => {
                let item_id = ItemId::new();
                let item = GroupItemRow {
                    item_id: *item_id.as_uuid(),
                    group_id: *group_id.as_uuid(),
                    name,
                    size,
                    content_type: session.content_type.clone(),
                    storage_key: session.storage_key.clone(),
                    created_at: committed_at,
                };
                self.metadata
                    .commit_group_item(*upload_id.as_uuid(), &item, committed_at)
                    .await
                    .map(|()| (item_id.to_string(), ItemKind::GroupItem))
            }
            None => {
                let file_id = FileId::new();
                let file = FileRow {
                    file_id: *file_id.as_uuid(),
                    owner_id: owner.to_string(),
                    name,
                    size,
                    content_type: session.content_type.clone(),
                    storage_key: session.storage_key.clone(),
                    created_at: committed_at,
                    expires_at: session.file_expires_at,
                };
                self.metadata
                    .commit_file(*upload_id.as_uuid(), &file, committed_at)
                    .await
                    .map(|()| (file_id.to_string(), ItemKind::File))
            }
        };

        let (item_ref, kind) = match committed {
            Ok(done) => done,
            Err(e) => {
                record_upload_error("metadata_commit");
                self.mark_failed(upload_id).await;
                self.discard_blob(&session.storage_key).await;
                return Err(insert_error(e, group_id));
            }
        };

        UPLOAD_COMPLETE_DURATION.observe(start.elapsed().as_secs_f64());
        UPLOAD_SESSIONS_COMPLETED.inc();
        tracing::info!(
            upload_id = %upload_id,
            item_ref = %item_ref,
            size = meta.size,
            "Upload completed"
        );

        Ok(CompleteUploadResponse {
            item_ref,
            kind,
            size: meta.size,
        })
    }

    /// Handle a refused `complete_session`.
    ///
    /// A stale etag hands the session back to the client so it can re-send
    /// the part; anything else leaves the session failed.
    async fn fail_assembly(&self, upload_id: &UploadId, err: StorageError) -> ApiError {
        if matches!(err, StorageError::InvalidPart { .. }) {
            if let Err(e) = self
                .metadata
                .transition_state(
                    *upload_id.as_uuid(),
                    &[UploadState::Completing],
                    UploadState::PartsInProgress,
                    now_secs(),
                )
                .await
            {
                tracing::warn!(upload_id = %upload_id, error = %e, "Failed to reopen upload session");
            }
            record_upload_error("invalid_part");
            return err.into();
        }

        record_upload_error("assemble");
        self.mark_failed(upload_id).await;
        tracing::warn!(upload_id = %upload_id, error = %err, "Backend refused to assemble upload");
        ApiError::AdapterFailure(err.to_string())
    }

    async fn mark_failed(&self, upload_id: &UploadId) {
        match self
            .metadata
            .transition_state(
                *upload_id.as_uuid(),
                &[UploadState::Completing],
                UploadState::Failed,
                now_secs(),
            )
            .await
        {
            Ok(_) => UPLOAD_SESSIONS_FAILED.inc(),
            Err(e) => {
                tracing::error!(upload_id = %upload_id, error = %e, "Failed to mark upload as failed")
            }
        }
    }

    /// Best-effort removal of a blob that will never get a metadata row.
    async fn discard_blob(&self, storage_key: &str) {
        if let Err(e) = self.storage.delete(storage_key).await {
            tracing::warn!(
                storage_key = %storage_key,
                error = %e,
                "Failed to delete orphaned blob"
            );
        }
    }

    /// Abort a chunked upload. Aborting an already aborted upload succeeds.
    #[tracing::instrument(skip(self, upload_id), fields(upload_id = %upload_id))]
    pub async fn abort(&self, owner: &str, upload_id: &UploadId) -> ApiResult<()> {
        let (session, state) = self.load_session(owner, upload_id).await?;
        if state == UploadState::Aborted {
            return Ok(());
        }
        if !state.is_active() {
            return Err(ApiError::Conflict(format!("upload {upload_id} is {state}")));
        }

        let moved = self
            .metadata
            .transition_state(
                *upload_id.as_uuid(),
                &[UploadState::Created, UploadState::PartsInProgress],
                UploadState::Aborted,
                now_secs(),
            )
            .await?;
        if !moved {
            return Err(ApiError::Conflict(format!(
                "upload {upload_id} changed state during abort"
            )));
        }

        // The registry entry stays until the sweeper reaps it, which retries this abort.
        self.storage
            .abort_session(&session.storage_key, &session.backend_session_id)
            .await
            .map_err(|e| ApiError::AdapterFailure(e.to_string()))?;

        UPLOAD_SESSIONS_ABORTED.inc();
        tracing::info!(upload_id = %upload_id, "Upload aborted");
        Ok(())
    }

    /// Store a file in one request.
    #[tracing::instrument(skip(self, params, data), fields(name = %params.name, size = data.len()))]
    pub async fn put_direct(
        &self,
        owner: &str,
        params: &DirectUpload,
        data: Bytes,
    ) -> ApiResult<CompleteUploadResponse> {
        let size = data.len() as u64;
        if size > self.limits.max_direct_bytes {
            record_upload_error("direct_too_large");
            return Err(ApiError::PayloadTooLarge {
                limit: self.limits.max_direct_bytes,
            });
        }
        validate_name(&params.name)?;

        let now = now_secs();
        let group = self
            .resolve_group(owner, params.group_id.as_deref(), now)
            .await?;
        let group_id = group.as_ref().map(|g| GroupId::from_uuid(g.group_id));
        let expires_at = match group_id {
            Some(_) => None,
            None => expiry_from(now, params.expires_in)?,
        };

        let storage_key = match &group_id {
            Some(group_id) => key::group_item_key(group_id, &params.name),
            None => key::file_key(owner, &params.name),
        };
        let attrs = object_attrs(owner, params.content_type.as_deref());
        self.storage.put(&storage_key, data, &attrs).await?;

        let db_size = to_db_size(size, "size")?;
        let inserted = match group_id {
            Some(group_id) => {
                let item_id = ItemId::new();
                let item = GroupItemRow {
                    item_id: *item_id.as_uuid(),
                    group_id: *group_id.as_uuid(),
                    name: params.name.clone(),
                    size: db_size,
                    content_type: params.content_type.clone(),
                    storage_key: storage_key.clone(),
                    created_at: now,
                };
                self.metadata
                    .create_group_item(&item)
                    .await
                    .map(|()| (item_id.to_string(), ItemKind::GroupItem))
            }
            None => {
                let file_id = FileId::new();
                let file = FileRow {
                    file_id: *file_id.as_uuid(),
                    owner_id: owner.to_string(),
                    name: params.name.clone(),
                    size: db_size,
                    content_type: params.content_type.clone(),
                    storage_key: storage_key.clone(),
                    created_at: now,
                    expires_at,
                };
                self.metadata
                    .create_file(&file)
                    .await
                    .map(|()| (file_id.to_string(), ItemKind::File))
            }
        };

        let (item_ref, kind) = match inserted {
            Ok(done) => done,
            Err(e) => {
                record_upload_error("metadata_insert");
                self.discard_blob(&storage_key).await;
                return Err(insert_error(e, group_id));
            }
        };

        DIRECT_UPLOADS.inc();
        BYTES_UPLOADED.inc_by(size);
        tracing::info!(item_ref = %item_ref, storage_key = %storage_key, size, "Stored direct upload");

        Ok(CompleteUploadResponse {
            item_ref,
            kind,
            size,
        })
    }

    /// Create an empty file group.
    pub async fn create_group(
        &self,
        owner: &str,
        req: &CreateGroupRequest,
    ) -> ApiResult<CreateGroupResponse> {
        validate_name(&req.name)?;
        let now = now_secs();
        let expires_at = expiry_from(now, req.expires_in)?;
        let group_id = GroupId::new();

        let row = GroupRow {
            group_id: *group_id.as_uuid(),
            owner_id: owner.to_string(),
            name: req.name.clone(),
            kind: req.kind.as_str().to_string(),
            declared_size: to_db_size(req.declared_size, "declared_size")?,
            declared_count: i64::from(req.declared_count),
            created_at: now,
            expires_at,
        };
        self.metadata.create_group(&row).await?;

        tracing::info!(group_id = %group_id, owner = %owner, kind = %req.kind, "Created file group");
        Ok(CreateGroupResponse {
            group_id: group_id.to_string(),
            expires_at,
        })
    }

    /// Delete a standalone file and its blob.
    pub async fn delete_file(&self, owner: &str, file_id: &FileId) -> ApiResult<()> {
        let file = self
            .metadata
            .get_file(*file_id.as_uuid())
            .await?
            .ok_or_else(|| ApiError::MetadataMissing(format!("file {file_id}")))?;
        if file.owner_id != owner {
            return Err(ApiError::OwnershipViolation(format!("file {file_id}")));
        }

        purge_file(self.storage.as_ref(), self.metadata.as_ref(), &file).await?;
        tracing::info!(file_id = %file_id, "Deleted file");
        Ok(())
    }

    /// Delete a group, every blob under its prefix, and its item rows.
    pub async fn delete_group(&self, owner: &str, group_id: &GroupId) -> ApiResult<()> {
        let group = self
            .metadata
            .get_group(*group_id.as_uuid())
            .await?
            .ok_or_else(|| ApiError::MetadataMissing(format!("group {group_id}")))?;
        if group.owner_id != owner {
            return Err(ApiError::OwnershipViolation(format!("group {group_id}")));
        }

        purge_group(self.storage.as_ref(), self.metadata.as_ref(), &group).await?;
        tracing::info!(group_id = %group_id, "Deleted file group");
        Ok(())
    }
}
