//! Transactional outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OutboxId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A domain event waiting to be relayed to the message bus.
///
/// Rows are written exactly once, inside the same transaction as the state
/// change they describe, and never updated afterwards. A separate relay tails
/// the table and publishes each row to `channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Producer-generated ID; stable across relay retries.
    pub id: OutboxId,

    /// Symbolic event name, e.g. `"create.room"`.
    pub event_type: String,

    /// Serialized event payload.
    pub event_data: Vec<u8>,

    /// Bus subject the relay publishes to.
    pub channel: String,

    pub aggregate_id: String,
    pub aggregate_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Creates a record published on a channel named after the event type.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_data: Vec<u8>,
    ) -> Self {
        let event_type = event_type.into();
        let now = Utc::now();
        Self {
            id: OutboxId::new(),
            channel: event_type.clone(),
            event_type,
            event_data,
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Deserializes the payload as JSON.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.event_data)
    }
}

/// Append-only access to the outbox table.
#[async_trait]
pub trait OutboxStore: Send {
    /// Inserts exactly one outbox row.
    ///
    /// Fails with `Duplicate` if the ID is taken and with
    /// `UnexpectedRowCount` if the engine reports anything but one row.
    async fn create_outbox(&mut self, record: &OutboxRecord) -> Result<()>;

    /// Lists the rows written for an aggregate, oldest first.
    async fn list_outbox_by_aggregate(
        &mut self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<OutboxRecord>>;
}
