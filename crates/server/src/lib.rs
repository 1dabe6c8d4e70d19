//! HTTP server for the satchel file sharing service.
//!
//! This crate provides:
//! - Chunked and single-request uploads
//! - Download links for files and groups
//! - The expiration sweeper
//! - Basic authentication against a credential directory

pub mod auth;
pub mod downloads;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod uploads;

pub use auth::{CredentialDirectory, Principal, StaticCredentialDirectory, TraceId};
pub use downloads::{DownloadResolver, Resolved};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use sweeper::{SweepStats, Sweeper};
pub use uploads::UploadOrchestrator;
