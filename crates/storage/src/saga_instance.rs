//! Durable saga instance rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The persisted state of one running saga.
///
/// There is exactly one row per saga. It always reflects the last committed
/// transition, never a half-applied one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Correlation ID shared with the outbound command and the reply.
    pub id: SagaId,

    /// Symbolic saga type, e.g. `"CreatePostSaga"`.
    pub saga_type: String,

    /// Serialized snapshot of the entity being orchestrated.
    pub saga_data: Vec<u8>,

    /// Name of the state entered by the last committed transition.
    pub current_state: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keyed access to saga instance rows.
#[async_trait]
pub trait SagaInstanceStore: Send {
    /// Inserts a new instance. Fails with `Duplicate` if the ID exists.
    async fn create_saga_instance(&mut self, instance: &SagaInstance) -> Result<()>;

    /// Overwrites `saga_data`, `current_state` and `updated_at` of an
    /// existing instance whose current state is `expected_state`.
    ///
    /// Fails with `NotFound` if the row vanished and with `StateConflict`
    /// if another transition already moved it.
    async fn update_saga_instance(
        &mut self,
        instance: &SagaInstance,
        expected_state: &str,
    ) -> Result<()>;

    /// Loads an instance. Fails with `NotFound` if no row exists.
    async fn get_saga_instance(&mut self, id: SagaId) -> Result<SagaInstance>;
}
