//! Link issuance and redemption.
//!
//! Ownership is checked once, when a link is issued. Redemption trusts the
//! token alone: whoever holds a valid link gets the content, whether or not
//! they are authenticated.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{LINKS_ISSUED, LINKS_REDEEMED, LINKS_REJECTED};
use crate::uploads::{is_expired, now_secs};
use satchel_core::config::LinksConfig;
use satchel_core::link::{GroupManifest, IssueLinkRequest, IssueLinkResponse, ManifestEntry};
use satchel_core::{FileId, GroupId, GroupKind, LinkPurpose, PERMANENT_LINK_TTL_SECS};
use satchel_metadata::MetadataStore;
use satchel_signer::{LinkSigner, SignerError};
use satchel_storage::{ByteStream, ObjectStore};
use std::fmt;
use std::sync::Arc;

/// Content type reported when none was recorded.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A blob ready to stream to the link holder.
pub struct FileDownload {
    /// Display name recorded at upload.
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub body: ByteStream,
}

impl fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDownload")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// What a redeemed link yields.
#[derive(Debug)]
pub enum Resolved {
    File(FileDownload),
    Group(GroupManifest),
}

fn rejection_reason(err: &SignerError) -> &'static str {
    match err {
        SignerError::Malformed(_) => "malformed",
        SignerError::InvalidSignature => "invalid_signature",
        SignerError::Expired { .. } => "expired",
        SignerError::InvalidTtl(_) | SignerError::WeakSecret { .. } => "other",
    }
}

/// Issues links for owned resources and resolves presented links.
pub struct DownloadResolver {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    signer: Arc<LinkSigner>,
    links: LinksConfig,
}

impl DownloadResolver {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        signer: Arc<LinkSigner>,
        links: LinksConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            signer,
            links,
        }
    }

    /// Lifetime to sign: permanent when unset, clamped to the configured maximum.
    fn effective_ttl(&self, requested: Option<u64>) -> ApiResult<u64> {
        match requested {
            Some(0) => Err(ApiError::Validation(
                "ttl_secs must be greater than 0".to_string(),
            )),
            Some(ttl) => Ok(ttl.min(self.links.max_ttl_secs)),
            None => Ok(PERMANENT_LINK_TTL_SECS.min(self.links.max_ttl_secs)),
        }
    }

    /// Mint a link for a resource `owner` owns.
    #[tracing::instrument(skip(self, req), fields(purpose = %req.purpose, resource_id = %req.resource_id))]
    pub async fn issue_link(
        &self,
        owner: &str,
        req: &IssueLinkRequest,
    ) -> ApiResult<IssueLinkResponse> {
        let now = now_secs();
        let ttl = self.effective_ttl(req.ttl_secs)?;
        let resource = match req.purpose {
            LinkPurpose::FileDownload => self.owned_blob_key(owner, &req.resource_id, now).await?,
            LinkPurpose::GroupDownload => {
                let group_id = GroupId::parse(&req.resource_id)?;
                let group = self
                    .metadata
                    .get_group(*group_id.as_uuid())
                    .await?
                    .filter(|group| !is_expired(group.expires_at, now))
                    .ok_or_else(|| ApiError::MetadataMissing(format!("group {group_id}")))?;
                if group.owner_id != owner {
                    return Err(ApiError::OwnershipViolation(format!("group {group_id}")));
                }
                group_id.to_string()
            }
        };

        let issued = self.signer.issue_at(resource, req.purpose, ttl, now)?;
        LINKS_ISSUED
            .with_label_values(&[req.purpose.as_str()])
            .inc();
        tracing::info!(owner = %owner, expires_at = issued.claims.exp, "Issued link");

        Ok(IssueLinkResponse {
            token: issued.token,
            purpose: req.purpose,
            expires_at: issued.claims.exp,
        })
    }

    /// Storage key of a file or group item owned by `owner`.
    async fn owned_blob_key(&self, owner: &str, resource_id: &str, now: i64) -> ApiResult<String> {
        let id = FileId::parse(resource_id)?;

        if let Some(file) = self.metadata.get_file(*id.as_uuid()).await? {
            if is_expired(file.expires_at, now) {
                return Err(ApiError::MetadataMissing(format!("file {resource_id}")));
            }
            if file.owner_id != owner {
                return Err(ApiError::OwnershipViolation(format!("file {resource_id}")));
            }
            return Ok(file.storage_key);
        }

        if let Some(owned) = self.metadata.get_group_item(*id.as_uuid()).await? {
            if owned.owner_id != owner {
                return Err(ApiError::OwnershipViolation(format!("item {resource_id}")));
            }
            self.live_group(owned.item.group_id, now).await?;
            return Ok(owned.item.storage_key);
        }

        Err(ApiError::MetadataMissing(format!("file {resource_id}")))
    }

    async fn live_group(
        &self,
        group_id: uuid::Uuid,
        now: i64,
    ) -> ApiResult<satchel_metadata::models::GroupRow> {
        self.metadata
            .get_group(group_id)
            .await?
            .filter(|group| !is_expired(group.expires_at, now))
            .ok_or_else(|| ApiError::MetadataMissing(format!("group {group_id}")))
    }

    /// Redeem a link against the current time.
    pub async fn resolve(&self, token: &str) -> ApiResult<Resolved> {
        self.resolve_at(token, now_secs()).await
    }

    /// Redeem a link treating `now` (Unix seconds) as the current time.
    pub async fn resolve_at(&self, token: &str, now: i64) -> ApiResult<Resolved> {
        let claims = self.signer.verify_at(token, now).map_err(|e| {
            LINKS_REJECTED
                .with_label_values(&[rejection_reason(&e)])
                .inc();
            ApiError::from(e)
        })?;

        let resolved = match claims.purpose {
            LinkPurpose::FileDownload => Resolved::File(self.open_blob(&claims.resource, now).await?),
            LinkPurpose::GroupDownload => {
                Resolved::Group(self.group_manifest(&claims.resource, now).await?)
            }
        };

        LINKS_REDEEMED
            .with_label_values(&[claims.purpose.as_str()])
            .inc();
        Ok(resolved)
    }

    async fn open_blob(&self, storage_key: &str, now: i64) -> ApiResult<FileDownload> {
        let (name, content_type, size) =
            if let Some(file) = self.metadata.get_file_by_key(storage_key).await? {
                if is_expired(file.expires_at, now) {
                    return Err(ApiError::MetadataMissing(storage_key.to_string()));
                }
                (file.name, file.content_type, file.size)
            } else if let Some(item) = self.metadata.get_group_item_by_key(storage_key).await? {
                self.live_group(item.group_id, now).await?;
                (item.name, item.content_type, item.size)
            } else {
                return Err(ApiError::MetadataMissing(storage_key.to_string()));
            };

        let body = self.storage.get_stream(storage_key).await?;
        Ok(FileDownload {
            name,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: u64::try_from(size).unwrap_or_default(),
            body,
        })
    }

    async fn group_manifest(&self, resource: &str, now: i64) -> ApiResult<GroupManifest> {
        let group_id =
            GroupId::parse(resource).map_err(|e| ApiError::TokenMalformed(e.to_string()))?;
        let group = self.live_group(*group_id.as_uuid(), now).await?;
        let kind = GroupKind::parse(&group.kind)
            .map_err(|e| ApiError::Internal(format!("group {group_id}: {e}")))?;

        let items = self.metadata.list_group_items(group.group_id).await?;
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let issued = self.signer.issue_at(
                item.storage_key,
                LinkPurpose::FileDownload,
                self.links.group_item_ttl_secs,
                now,
            )?;
            entries.push(ManifestEntry {
                name: item.name,
                size: u64::try_from(item.size).unwrap_or_default(),
                content_type: item
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                download_ref: issued.token,
            });
        }

        Ok(GroupManifest {
            group_id: group_id.to_string(),
            name: group.name,
            kind,
            declared_size: u64::try_from(group.declared_size).unwrap_or_default(),
            declared_count: u32::try_from(group.declared_count).unwrap_or_default(),
            items: entries,
        })
    }
}
