//! Outbound events written to the outbox by saga transitions.
//!
//! The event type, and with it the payload schema, depends on the state the
//! saga is entering. Each event is published on a channel of the same name.

use common::{PostId, SagaId, UserId};
use serde::{Deserialize, Serialize};
use storage::OutboxRecord;

use crate::error::Result;
use crate::manager::CreatePostSaga;
use crate::snapshot::PostSnapshotV1;
use crate::state::SideEffect;

/// Command to the room service.
pub const CREATE_ROOM: &str = "create.room";

/// The post passed its saga and is live.
pub const POST_APPROVED: &str = "post.approved";

/// The post was withdrawn by compensation.
pub const POST_REJECTED: &str = "post.rejected";

/// Aggregate type recorded on every outbox row written by the saga.
pub const AGGREGATE_TYPE: &str = "post";

/// Payload of `create.room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoom {
    pub saga_id: SagaId,
    pub post_id: PostId,
    pub user_id: UserId,
}

/// Builds the outbox row for a transition's side effect.
pub fn outbox_record(side_effect: SideEffect, saga: &CreatePostSaga) -> Result<OutboxRecord> {
    let post = saga.post();
    let (event_type, data) = match side_effect {
        SideEffect::RequestRoom => (
            CREATE_ROOM,
            serde_json::to_vec(&CreateRoom {
                saga_id: saga.id(),
                post_id: post.id,
                user_id: post.user_id,
            })?,
        ),
        SideEffect::ApprovePost => (
            POST_APPROVED,
            serde_json::to_vec(&PostSnapshotV1::from(post))?,
        ),
        SideEffect::CompensatePost => (
            POST_REJECTED,
            serde_json::to_vec(&PostSnapshotV1::from(post))?,
        ),
    };

    Ok(OutboxRecord::new(
        event_type,
        AGGREGATE_TYPE,
        post.id.to_string(),
        data,
    ))
}
