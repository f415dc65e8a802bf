//! Saga error types.

use std::time::Duration;

use common::SagaId;
use domain::DomainError;
use storage::StoreError;
use thiserror::Error;

use crate::state::{CreatePostSagaState, SagaEvent};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The event is not allowed in the saga's current state.
    #[error("Invalid transition: cannot fire {event} in state {state}")]
    InvalidTransition {
        event: SagaEvent,
        state: CreatePostSagaState,
    },

    /// No saga instance exists for the ID; the reply is orphaned.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// The saga instance belongs to a different saga type.
    #[error("Saga {saga_id} has type {saga_type}, expected {expected}")]
    UnexpectedSagaType {
        saga_id: SagaId,
        saga_type: String,
        expected: &'static str,
    },

    /// The persisted state name is not one this saga knows.
    #[error("Unknown saga state: {0}")]
    UnknownState(String),

    /// Snapshot or payload (de)serialization failed.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// The snapshot was written by a version this build cannot read.
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedSnapshotVersion(u32),

    /// A reply message could not be decoded.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The operation did not finish within the configured timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl SagaError {
    /// Returns true if a saga instance or post is missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            SagaError::SagaNotFound(_) => true,
            SagaError::Store(e) => e.is_not_found(),
            SagaError::Domain(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
