//! Repository traits for metadata operations.

pub mod files;
pub mod groups;
pub mod uploads;

pub use files::FileRepo;
pub use groups::GroupRepo;
pub use uploads::UploadSessionRepo;
