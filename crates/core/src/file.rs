//! Standalone file identifiers.

uuid_id!(
    /// Unique identifier for a standalone uploaded file.
    FileId,
    "file ID"
);
