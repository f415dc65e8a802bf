//! Domain error types.

use std::time::Duration;

use storage::StoreError;
use thiserror::Error;

use crate::post::PostError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A post or application rule was violated.
    #[error("Post error: {0}")]
    Post(PostError),

    /// A page token could not be decoded.
    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    /// The operation did not finish within the configured timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl DomainError {
    /// Returns true if a requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::Store(e) if e.is_not_found())
    }
}

impl From<PostError> for DomainError {
    fn from(e: PostError) -> Self {
        DomainError::Post(e)
    }
}
