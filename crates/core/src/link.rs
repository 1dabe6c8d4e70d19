//! Download link purposes and the claims carried by a link token.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a download link grants. Closed set; unknown purposes never verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkPurpose {
    /// Stream one blob. The resource reference is its storage key.
    #[serde(rename = "file-download")]
    FileDownload,
    /// List a group. The resource reference is the group ID.
    #[serde(rename = "group-download")]
    GroupDownload,
}

impl LinkPurpose {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "file-download" => Ok(Self::FileDownload),
            "group-download" => Ok(Self::GroupDownload),
            _ => Err(crate::Error::UnknownPurpose(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileDownload => "file-download",
            Self::GroupDownload => "group-download",
        }
    }
}

impl fmt::Display for LinkPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims signed into a link token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkClaims {
    /// Storage key or group ID, depending on `purpose`.
    #[serde(rename = "ref")]
    pub resource: String,
    /// What the holder may do with `resource`.
    pub purpose: LinkPurpose,
    /// Expiry as Unix seconds. The token is invalid once `now >= exp`.
    pub exp: i64,
}

/// Request to mint a download link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueLinkRequest {
    /// File ID, group item ID, or group ID.
    pub resource_id: String,
    /// Link purpose.
    pub purpose: LinkPurpose,
    /// Lifetime in seconds. `None` issues a permanent link.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Response carrying a minted download link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueLinkResponse {
    /// The bearer token.
    pub token: String,
    /// Link purpose.
    pub purpose: LinkPurpose,
    /// Expiry as Unix seconds.
    pub expires_at: i64,
}

/// One entry in a group download manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Item name, possibly a relative path.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Recorded MIME type.
    pub content_type: String,
    /// Short-lived file-download token for this item.
    pub download_ref: String,
}

/// Manifest returned when redeeming a group-download link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupManifest {
    /// Group ID.
    pub group_id: String,
    /// Group display name.
    pub name: String,
    /// Group kind.
    pub kind: crate::GroupKind,
    /// Size declared when the group was created (advisory).
    pub declared_size: u64,
    /// Item count declared when the group was created (advisory).
    pub declared_count: u32,
    /// Items actually committed.
    pub items: Vec<ManifestEntry>,
}
