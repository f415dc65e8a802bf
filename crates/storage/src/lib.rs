//! Persistence layer for the post service.
//!
//! Every write that must be atomic with another write goes through one
//! [`Transaction`] obtained from [`Store::begin`]. Dropping a transaction
//! without committing rolls it back.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod post;
pub mod postgres;
pub mod saga_instance;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{FailPoint, InMemoryStore, InMemoryTx};
pub use outbox::{OutboxRecord, OutboxStore};
pub use post::{ApplyPostStore, PostStore};
pub use postgres::{PostgresStore, PostgresTx};
pub use saga_instance::{SagaInstance, SagaInstanceStore};
pub use store::{Store, Transaction};
