//! HTTP request handlers.

pub mod admin;
pub mod common;
pub mod files;
pub mod groups;
pub mod links;
pub mod uploads;

pub use admin::*;
pub use common::*;
pub use files::*;
pub use groups::*;
pub use links::*;
pub use uploads::*;
