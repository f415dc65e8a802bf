//! Post and apply-post persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ApplyPost, ApplyPostId, NewApplyPost, NewPost, Post, PostFilter, PostId, UserId};

use crate::Result;

/// CRUD access to posts and their fish-type associations.
#[async_trait]
pub trait PostStore: Send {
    /// Inserts a post and its fish types, returning it with its new ID.
    async fn create_post(&mut self, post: NewPost, now: DateTime<Utc>) -> Result<Post>;

    /// Loads a post with its fish types.
    async fn get_post(&mut self, id: PostId) -> Result<Post>;

    /// Overwrites the editable columns and replaces the fish types.
    async fn update_post(&mut self, post: &Post) -> Result<()>;

    /// Deletes a post together with its fish types and applications.
    async fn delete_post(&mut self, id: PostId) -> Result<()>;

    /// Lists up to `limit` posts matching `filter`, strictly after `cursor`
    /// in the filter's sort order.
    async fn list_posts(
        &mut self,
        filter: &PostFilter,
        limit: i64,
        cursor: Option<PostId>,
    ) -> Result<Vec<Post>>;
}

/// CRUD access to applications.
#[async_trait]
pub trait ApplyPostStore: Send {
    /// Inserts an application. A user may apply to a post only once.
    async fn create_apply_post(
        &mut self,
        apply_post: NewApplyPost,
        now: DateTime<Utc>,
    ) -> Result<ApplyPost>;

    async fn get_apply_post(&mut self, id: ApplyPostId) -> Result<ApplyPost>;

    async fn delete_apply_post(&mut self, id: ApplyPostId) -> Result<()>;

    async fn count_apply_posts_by_post_id(&mut self, post_id: PostId) -> Result<i64>;

    async fn list_apply_posts_by_user_id(&mut self, user_id: UserId) -> Result<Vec<ApplyPost>>;

    async fn list_apply_posts_by_post_id(&mut self, post_id: PostId) -> Result<Vec<ApplyPost>>;

    async fn batch_get_apply_posts_by_post_ids(
        &mut self,
        post_ids: &[PostId],
    ) -> Result<Vec<ApplyPost>>;
}
