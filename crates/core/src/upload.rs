//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id!(
    /// Unique identifier for a chunked upload session.
    UploadId,
    "upload ID"
);

/// Upload session state.
///
/// ```text
/// Created -> PartsInProgress -> Completing -> Completed
///    |              |               |
///    +----> Aborted <+              +-> Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Backend session exists, no parts received yet.
    Created,
    /// At least one part has been received.
    PartsInProgress,
    /// A complete call claimed the session and is assembling the object.
    Completing,
    /// The object was assembled and its metadata row written.
    Completed,
    /// Assembly failed at the storage backend.
    Failed,
    /// Session was explicitly aborted or reaped after expiry.
    Aborted,
}

impl UploadState {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "parts_in_progress" => Ok(Self::PartsInProgress),
            "completing" => Ok(Self::Completing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(crate::Error::UploadSession(format!(
                "unknown upload state: {s}"
            ))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PartsInProgress => "parts_in_progress",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Check if the session can still receive parts or be completed.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Created | Self::PartsInProgress)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to start a chunked upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadRequest {
    /// Display name of the file.
    pub name: String,
    /// Declared total size in bytes.
    pub size: u64,
    /// Number of parts the client will send.
    pub total_chunks: u32,
    /// MIME type recorded for downloads.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Upload into this group instead of as a standalone file.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Seconds until the resulting file expires. Ignored for group items.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Response from starting a chunked upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadResponse {
    /// Session handle for subsequent part uploads.
    pub upload_id: String,
    /// Storage key the assembled object will be written to.
    pub storage_key: String,
    /// Largest part the server accepts.
    pub max_chunk_bytes: u64,
    /// When the session is reaped if not completed (Unix seconds).
    pub expires_at: i64,
}

/// Receipt for a single uploaded part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartReceipt {
    /// Part number (1-based).
    pub part_number: u32,
    /// Backend etag for the part.
    pub etag: String,
}

/// Request to assemble an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    /// Every part to keep, in any order.
    pub parts: Vec<PartReceipt>,
    /// Optional final display name overriding the declared one.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional final size as reported by the client.
    #[serde(default)]
    pub size: Option<u64>,
}

/// What a completed upload produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A standalone file record.
    File,
    /// An item inside a file group.
    GroupItem,
}

/// Response from completing an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    /// ID of the created file or group item.
    pub item_ref: String,
    /// Which kind of record was created.
    pub kind: ItemKind,
    /// Assembled size in bytes.
    pub size: u64,
}

/// Check that `parts` names every part in `1..=total` exactly once.
///
/// Returns the sorted part numbers on success, or a description of the first
/// gap or duplicate found.
pub fn check_part_set(parts: &[u32], total: u32) -> Result<Vec<u32>, String> {
    let mut sorted = parts.to_vec();
    sorted.sort_unstable();

    for window in sorted.windows(2) {
        if window[0] == window[1] {
            return Err(format!("part {} listed more than once", window[0]));
        }
    }

    for (expected, actual) in (1..=total).zip(sorted.iter()) {
        if expected != *actual {
            return Err(format!("part {expected} is missing"));
        }
    }

    match sorted.len().cmp(&(total as usize)) {
        std::cmp::Ordering::Less => Err(format!("part {} is missing", sorted.len() + 1)),
        std::cmp::Ordering::Greater => Err(format!(
            "{} parts listed but only {total} declared",
            sorted.len()
        )),
        std::cmp::Ordering::Equal => Ok(sorted),
    }
}
