//! Posts, applications and the rules that govern them.

pub mod page_token;
mod service;
pub mod validation;

use common::{PostId, UserId};
use thiserror::Error;

pub use service::{PostPage, PostService};

/// Largest page a single listing may request.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Errors raised by post and application rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostError {
    /// Title is blank.
    #[error("Title must not be empty")]
    EmptyTitle,

    /// Content is blank.
    #[error("Content must not be empty")]
    EmptyContent,

    /// max_apply is below one.
    #[error("Invalid max_apply: {max_apply} (must be at least 1)")]
    InvalidMaxApply { max_apply: i64 },

    /// No fish type was given.
    #[error("At least one fish type is required")]
    NoFishTypes,

    /// A negative or oversized page was requested.
    #[error("Invalid page size: {page_size} (at most {})", MAX_PAGE_SIZE)]
    InvalidPageSize { page_size: i64 },

    /// The caller does not own the row it tried to change.
    #[error("User {user_id} is not allowed to modify {entity} {id}")]
    PermissionDenied {
        user_id: UserId,
        entity: &'static str,
        id: String,
    },

    /// A user tried to apply to their own post.
    #[error("User {user_id} cannot apply to their own post {post_id}")]
    SelfApplication { post_id: PostId, user_id: UserId },

    /// The post has no room for another application.
    #[error("Post {post_id} already reached its max_apply limit of {max_apply}")]
    MaxApplyReached { post_id: PostId, max_apply: i64 },

    /// An update would leave more applications than max_apply allows.
    #[error("max_apply is {max_apply} but the post already has {applicants} applications")]
    MaxApplyBelowApplicants { max_apply: i64, applicants: i64 },
}

impl PostError {
    /// Returns true for malformed input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PostError::EmptyTitle
                | PostError::EmptyContent
                | PostError::InvalidMaxApply { .. }
                | PostError::NoFishTypes
                | PostError::InvalidPageSize { .. }
        )
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PostError::PermissionDenied { .. })
    }

    /// Returns true for well-formed requests that the current state refuses.
    pub fn is_failed_precondition(&self) -> bool {
        matches!(
            self,
            PostError::SelfApplication { .. }
                | PostError::MaxApplyReached { .. }
                | PostError::MaxApplyBelowApplicants { .. }
        )
    }
}
