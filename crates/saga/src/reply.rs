//! Replies from the room service.
//!
//! Each reply is matched to its saga by ID, the saga is rebuilt from the
//! stored instance and the matching event is fired. A reply for a saga that
//! already left `CreatingRoom` fails with `InvalidTransition`, which lets the
//! message layer tell a duplicate delivery from a successful one.

use common::SagaId;
use serde::{Deserialize, Serialize};
use storage::Store;

use crate::error::{Result, SagaError};
use crate::manager::{self, CreatePostSaga, CreatePostSagaManager};
use crate::state::SagaEvent;

/// Bus subject the room service answers on.
pub const REPLY_SUBJECT: &str = "create.post.saga.reply";

/// A reply envelope, tagged by `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum SagaReply {
    #[serde(rename = "room.created")]
    RoomCreated { saga_id: SagaId },

    #[serde(rename = "create.room.failed")]
    CreateRoomFailed {
        saga_id: SagaId,
        #[serde(default)]
        error_message: String,
    },
}

impl SagaReply {
    /// Decodes a reply message body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| SagaError::InvalidReply(e.to_string()))
    }

    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaReply::RoomCreated { saga_id } | SagaReply::CreateRoomFailed { saga_id, .. } => {
                *saga_id
            }
        }
    }
}

/// Routes room-service replies to their sagas.
#[derive(Clone)]
pub struct SagaReplyDispatcher<S: Store> {
    manager: CreatePostSagaManager<S>,
}

impl<S: Store> SagaReplyDispatcher<S> {
    /// Creates a new dispatcher over the given store.
    pub fn new(store: S) -> Self {
        Self {
            manager: CreatePostSagaManager::new(store),
        }
    }

    /// Handles a decoded reply.
    pub async fn dispatch(&self, reply: SagaReply) -> Result<CreatePostSaga> {
        match reply {
            SagaReply::RoomCreated { saga_id } => self.room_created(saga_id).await,
            SagaReply::CreateRoomFailed {
                saga_id,
                error_message,
            } => self.create_room_failed(saga_id, &error_message).await,
        }
    }

    /// The room exists: approves the post.
    #[tracing::instrument(skip(self))]
    pub async fn room_created(&self, saga_id: SagaId) -> Result<CreatePostSaga> {
        let mut saga = self.load(saga_id).await?;
        self.manager.fire(&mut saga, SagaEvent::ApprovePost).await?;
        Ok(saga)
    }

    /// Room creation failed: deletes the post.
    #[tracing::instrument(skip(self))]
    pub async fn create_room_failed(
        &self,
        saga_id: SagaId,
        error_message: &str,
    ) -> Result<CreatePostSaga> {
        tracing::warn!(%saga_id, error_message, "room creation failed, rejecting post");
        let mut saga = self.load(saga_id).await?;
        self.manager.fire(&mut saga, SagaEvent::RejectPost).await?;
        Ok(saga)
    }

    /// Loads and rebuilds a saga. The read transaction is closed before the
    /// caller fires the next event.
    async fn load(&self, saga_id: SagaId) -> Result<CreatePostSaga> {
        let instance = {
            let mut tx = self.manager.store().begin().await?;
            manager::load_instance(&mut tx, saga_id).await?
        };
        CreatePostSaga::rehydrate(&instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_room_created() {
        let saga_id = SagaId::new();
        let body = format!(r#"{{"event_type":"room.created","saga_id":"{saga_id}"}}"#);
        let reply = SagaReply::decode(body.as_bytes()).unwrap();
        assert_eq!(reply, SagaReply::RoomCreated { saga_id });
    }

    #[test]
    fn decodes_create_room_failed() {
        let saga_id = SagaId::new();
        let body = format!(
            r#"{{"event_type":"create.room.failed","saga_id":"{saga_id}","error_message":"quota exceeded"}}"#
        );
        let reply = SagaReply::decode(body.as_bytes()).unwrap();
        assert_eq!(reply.saga_id(), saga_id);
        assert_eq!(
            reply,
            SagaReply::CreateRoomFailed {
                saga_id,
                error_message: "quota exceeded".to_string()
            }
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let saga_id = SagaId::new();
        let body = format!(r#"{{"event_type":"room.deleted","saga_id":"{saga_id}"}}"#);
        assert!(matches!(
            SagaReply::decode(body.as_bytes()),
            Err(SagaError::InvalidReply(_))
        ));
    }

    #[test]
    fn malformed_saga_id_is_rejected() {
        let body = br#"{"event_type":"room.created","saga_id":"nope"}"#;
        assert!(matches!(
            SagaReply::decode(body),
            Err(SagaError::InvalidReply(_))
        ));
    }
}
