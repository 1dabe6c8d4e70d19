//! File groups: archives split into parts, or folders of files.

use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id!(
    /// Unique identifier for a file group.
    GroupId,
    "group ID"
);

uuid_id!(
    /// Unique identifier for an item inside a file group.
    ItemId,
    "group item ID"
);

/// What a group represents. Purely descriptive; the server treats both the same.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// A single archive uploaded as several pieces.
    Archive,
    /// A folder whose items carry relative paths in their names.
    Folder,
}

impl GroupKind {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "archive" => Ok(Self::Archive),
            "folder" => Ok(Self::Folder),
            _ => Err(crate::Error::UnknownGroupKind(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to create a file group.
///
/// `declared_size` and `declared_count` are advisory. They are stored as
/// given and reported back in manifests, but committed items are never
/// reconciled against them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    /// Display name of the group.
    pub name: String,
    /// Client-declared total size in bytes.
    #[serde(default)]
    pub declared_size: u64,
    /// Client-declared number of items.
    #[serde(default)]
    pub declared_count: u32,
    /// Group kind.
    pub kind: GroupKind,
    /// Seconds until the group expires. `None` keeps it until deleted.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Response from creating a file group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateGroupResponse {
    /// The new group ID.
    pub group_id: String,
    /// Expiry as Unix seconds, if any.
    pub expires_at: Option<i64>,
}
