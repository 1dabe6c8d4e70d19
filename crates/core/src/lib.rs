//! Core domain types and shared logic for the satchel file sharing service.
//!
//! This crate defines the data model used across all other crates:
//! - File, group, and upload identifiers
//! - Upload session lifecycle
//! - Storage key derivation
//! - Download link purposes and claims
//! - Application configuration

/// Defines a UUID-backed identifier newtype with parse/display support.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            /// Parse from a string.
            pub fn parse(s: &str) -> crate::Result<Self> {
                uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| crate::Error::InvalidId(format!("invalid {}: {e}", $label)))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                Self::parse(s)
            }
        }
    };
}

pub mod config;
pub mod error;
pub mod file;
pub mod group;
pub mod key;
pub mod link;
pub mod upload;

pub use error::{Error, Result};
pub use file::FileId;
pub use group::{GroupId, GroupKind, ItemId};
pub use link::{LinkClaims, LinkPurpose};
pub use upload::{UploadId, UploadState};

/// Default per-part byte ceiling: 32 MiB
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 32 * 1024 * 1024;

/// Default single-request upload ceiling: 16 MiB
pub const DEFAULT_MAX_DIRECT_BYTES: u64 = 16 * 1024 * 1024;

/// Highest part number a multipart session accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Link lifetime used for "permanent" links: 100 years.
pub const PERMANENT_LINK_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;
