//! Database models mapping to the metadata schema.
//!
//! Timestamps are integer Unix seconds so expiry predicates compare exactly
//! in SQL.

use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// Files
// =============================================================================

/// Standalone file record.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub storage_key: String,
    pub created_at: i64,
    /// `None` means the file never expires.
    pub expires_at: Option<i64>,
}

// =============================================================================
// Groups
// =============================================================================

/// File group record. Declared size and count are advisory.
#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub group_id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub kind: String,
    pub declared_size: i64,
    pub declared_count: i64,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Member of a file group. Its lifetime follows the parent group.
#[derive(Debug, Clone, FromRow)]
pub struct GroupItemRow {
    pub item_id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub storage_key: String,
    pub created_at: i64,
}

/// A group item joined with the owner of its group.
#[derive(Debug, Clone, FromRow)]
pub struct OwnedGroupItemRow {
    #[sqlx(flatten)]
    pub item: GroupItemRow,
    pub owner_id: String,
}

// =============================================================================
// Upload sessions
// =============================================================================

/// Registry entry for a chunked upload.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_id: Uuid,
    pub owner_id: String,
    pub storage_key: String,
    /// Opaque session id handed out by the object store.
    pub backend_session_id: String,
    pub group_id: Option<Uuid>,
    pub declared_name: String,
    pub declared_size: i64,
    pub total_chunks: i64,
    pub content_type: Option<String>,
    /// Expiry to stamp on the file record once the upload completes.
    pub file_expires_at: Option<i64>,
    pub state: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// When the session itself is considered abandoned.
    pub expires_at: i64,
}
