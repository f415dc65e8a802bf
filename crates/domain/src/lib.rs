//! Domain layer for the post service.
//!
//! This crate provides the business rules around posts and applications:
//! - Input validation and fish-type normalization
//! - Ownership checks for edits and deletions
//! - The max-apply capacity invariant, re-checked after every write
//! - Opaque page tokens for post listings

pub mod config;
pub mod error;
pub mod post;

pub use config::ServiceConfig;
pub use error::DomainError;
pub use post::{MAX_PAGE_SIZE, PostError, PostPage, PostService, page_token, validation};
