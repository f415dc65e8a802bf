use common::SagaId;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row exists for the requested key.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A row with the same key already exists.
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A write touched a different number of rows than it must.
    #[error("expected {expected} row(s) affected, got {actual}")]
    UnexpectedRowCount { expected: u64, actual: u64 },

    /// A saga instance was not in the state the update expected.
    #[error("saga instance {saga_id} is in state {actual}, expected {expected}")]
    StateConflict {
        saga_id: SagaId,
        expected: String,
        actual: String,
    },

    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if the error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Checks that a write affected exactly `expected` rows.
    pub(crate) fn check_rows(expected: u64, actual: u64) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(StoreError::UnexpectedRowCount { expected, actual })
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
