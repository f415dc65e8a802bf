//! Saga orchestration for post creation.
//!
//! This crate provides the CreatePost saga, which spans this service and
//! the room service:
//! 1. Persist the post, the saga instance and a `create.room` event in one
//!    transaction
//! 2. On `room.created`, approve the post and emit `post.approved`
//! 3. On `create.room.failed`, delete the post and emit `post.rejected`
//!
//! Events are written to the transactional outbox; publishing them is left
//! to a relay.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod manager;
pub mod reply;
pub mod snapshot;
pub mod state;

pub use coordinator::{SagaCoordinator, SagaSummary};
pub use error::SagaError;
pub use events::CreateRoom;
pub use manager::{CreatePostSaga, CreatePostSagaManager, SAGA_TYPE};
pub use reply::{REPLY_SUBJECT, SagaReply, SagaReplyDispatcher};
pub use snapshot::PostSnapshotV1;
pub use state::{CreatePostSagaState, SagaEvent, SideEffect, Transition};
