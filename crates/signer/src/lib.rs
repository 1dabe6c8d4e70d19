//! Download link tokens for satchel.
//!
//! This crate provides:
//! - HMAC-SHA256 signed bearer tokens carrying a resource, a purpose, and an expiry
//! - Verification with a fixed check order: structure, signature, then expiry
//!
//! Tokens are self-contained. There is no revocation list; rotating the
//! secret is the only way to invalidate outstanding links.

pub mod error;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use signer::{IssuedLink, LinkSigner};
