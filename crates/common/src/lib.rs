//! Identifiers and plain records shared by every layer of the post service.

pub mod post;
pub mod types;

pub use post::{
    ApplyPost, NewApplyPost, NewPost, OrderBy, Post, PostFilter, PostUpdate, SortBy,
};
pub use types::{ApplyPostId, OutboxId, ParseIdError, PostId, SagaId, UserId};
