use async_trait::async_trait;

use crate::{ApplyPostStore, OutboxStore, PostStore, Result, SagaInstanceStore};

/// An open unit of work.
///
/// Every repository call made through a transaction participates in it.
/// `commit` makes all of them visible at once; `rollback`, or dropping the
/// transaction, discards all of them. A failed commit leaves nothing behind.
#[async_trait]
pub trait Transaction: OutboxStore + SagaInstanceStore + PostStore + ApplyPostStore + Send {
    /// Commits every write made through this transaction.
    async fn commit(self) -> Result<()>;

    /// Discards every write made through this transaction.
    async fn rollback(self) -> Result<()>;
}

/// A shared, process-wide handle to the storage backend.
///
/// All implementations must be thread-safe (Send + Sync) and cheap to clone.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: Transaction + 'static;

    /// Starts a transaction. Nested transactions are not supported: a caller
    /// holds at most one open transaction per logical operation.
    async fn begin(&self) -> Result<Self::Tx>;
}
