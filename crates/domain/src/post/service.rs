//! Post service providing the post and application use cases.

use std::future::Future;

use chrono::Utc;
use common::{
    ApplyPost, ApplyPostId, NewApplyPost, Post, PostFilter, PostId, PostUpdate, UserId,
};
use serde::Serialize;
use storage::{ApplyPostStore, PostStore, Store, Transaction};

use super::{MAX_PAGE_SIZE, PostError, page_token, validation};
use crate::{DomainError, ServiceConfig};

/// One page of a post listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostPage {
    pub posts: Vec<Post>,

    /// Token for the following page; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Service for managing posts and applications.
///
/// Every operation runs inside its own transaction and under the configured
/// timeout. When the timeout fires the in-flight transaction is dropped,
/// which rolls it back.
#[derive(Clone)]
pub struct PostService<S: Store> {
    store: S,
    config: ServiceConfig,
}

impl<S: Store> PostService<S> {
    /// Creates a new post service over the given store.
    pub fn new(store: S, config: ServiceConfig) -> Self {
        Self { store, config }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, DomainError>>,
    {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| DomainError::Timeout(self.config.timeout))?
    }

    /// Loads a post with its fish types.
    #[tracing::instrument(skip(self))]
    pub async fn get_post(&self, id: PostId) -> Result<Post, DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            Ok(tx.get_post(id).await?)
        })
        .await
    }

    /// Lists one page of posts.
    ///
    /// A missing or zero `page_size` falls back to the configured default;
    /// anything above `MAX_PAGE_SIZE` is rejected.
    /// One extra row is fetched to decide whether another page follows.
    #[tracing::instrument(skip(self))]
    pub async fn list_posts(
        &self,
        filter: &PostFilter,
        page_size: Option<i64>,
        token: Option<&str>,
    ) -> Result<PostPage, DomainError> {
        let page_size = match page_size {
            None | Some(0) => self.config.default_page_size,
            Some(n) if !(0..=MAX_PAGE_SIZE).contains(&n) => {
                return Err(PostError::InvalidPageSize { page_size: n }.into());
            }
            Some(n) => n,
        };
        let token = token.filter(|t| !t.is_empty());
        let cursor = token.map(page_token::decode).transpose()?;

        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            let mut posts = tx
                .list_posts(filter, page_size.saturating_add(1), cursor)
                .await
                .map_err(|e| match token {
                    // the cursor row is gone
                    Some(token) if e.is_not_found() => {
                        DomainError::InvalidPageToken(token.to_string())
                    }
                    _ => e.into(),
                })?;

            let mut next_page_token = None;
            if posts.len() as i64 > page_size {
                posts.truncate(page_size as usize);
                next_page_token = posts.last().map(|p| page_token::encode(p.id));
            }
            Ok(PostPage {
                posts,
                next_page_token,
            })
        })
        .await
    }

    /// Updates a post on behalf of its owner.
    ///
    /// `max_apply` may not drop below the number of existing applications.
    /// Applications committed concurrently with the update are caught by a
    /// second count after commit, in which case the previous post is restored.
    #[tracing::instrument(skip(self))]
    pub async fn update_post(&self, update: PostUpdate) -> Result<Post, DomainError> {
        let update = validation::validate_update(update)?;

        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            let mut post = tx.get_post(update.id).await?;
            if post.user_id != update.user_id {
                return Err(PostError::PermissionDenied {
                    user_id: update.user_id,
                    entity: "post",
                    id: post.id.to_string(),
                }
                .into());
            }

            let applicants = tx.count_apply_posts_by_post_id(post.id).await?;
            if applicants > update.max_apply {
                return Err(PostError::MaxApplyBelowApplicants {
                    max_apply: update.max_apply,
                    applicants,
                }
                .into());
            }

            let previous = post.clone();
            post.apply_update(&update, Utc::now());
            tx.update_post(&post).await?;
            tx.commit().await?;

            let mut tx = self.store.begin().await?;
            let applicants = tx.count_apply_posts_by_post_id(post.id).await?;
            if applicants > post.max_apply {
                tx.update_post(&previous).await?;
                tx.commit().await?;
                metrics::counter!("post_update_compensations_total").increment(1);
                tracing::warn!(
                    post_id = %post.id,
                    max_apply = post.max_apply,
                    applicants,
                    "reverted post update that raced with new applications"
                );
                return Err(PostError::MaxApplyBelowApplicants {
                    max_apply: post.max_apply,
                    applicants,
                }
                .into());
            }

            tracing::info!(post_id = %post.id, "post updated");
            Ok(post)
        })
        .await
    }

    /// Deletes a post, with its fish types and applications, on behalf of
    /// its owner.
    #[tracing::instrument(skip(self))]
    pub async fn delete_post(&self, id: PostId, user_id: UserId) -> Result<(), DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            let post = tx.get_post(id).await?;
            if post.user_id != user_id {
                return Err(PostError::PermissionDenied {
                    user_id,
                    entity: "post",
                    id: id.to_string(),
                }
                .into());
            }
            tx.delete_post(id).await?;
            tx.commit().await?;

            tracing::info!(post_id = %id, "post deleted");
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_apply_post(&self, id: ApplyPostId) -> Result<ApplyPost, DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            Ok(tx.get_apply_post(id).await?)
        })
        .await
    }

    /// Lists the applications a user has made.
    #[tracing::instrument(skip(self))]
    pub async fn list_apply_posts_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ApplyPost>, DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            Ok(tx.list_apply_posts_by_user_id(user_id).await?)
        })
        .await
    }

    /// Lists the applications made to a post.
    #[tracing::instrument(skip(self))]
    pub async fn list_apply_posts_by_post_id(
        &self,
        post_id: PostId,
    ) -> Result<Vec<ApplyPost>, DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            Ok(tx.list_apply_posts_by_post_id(post_id).await?)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn batch_get_apply_posts_by_post_ids(
        &self,
        post_ids: &[PostId],
    ) -> Result<Vec<ApplyPost>, DomainError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            Ok(tx.batch_get_apply_posts_by_post_ids(post_ids).await?)
        })
        .await
    }

    /// Applies a user to a post.
    ///
    /// The owner cannot apply, and a full post refuses new applications.
    /// After commit the applications are counted again; when concurrent
    /// writers pushed the post over `max_apply`, the earliest applications
    /// are kept and this one is deleted if it falls outside them.
    #[tracing::instrument(skip(self))]
    pub async fn create_apply_post(
        &self,
        apply_post: NewApplyPost,
    ) -> Result<ApplyPost, DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            let post = tx.get_post(apply_post.post_id).await?;
            if post.user_id == apply_post.user_id {
                return Err(PostError::SelfApplication {
                    post_id: post.id,
                    user_id: apply_post.user_id,
                }
                .into());
            }

            let applicants = tx.count_apply_posts_by_post_id(post.id).await?;
            if applicants >= post.max_apply {
                return Err(PostError::MaxApplyReached {
                    post_id: post.id,
                    max_apply: post.max_apply,
                }
                .into());
            }

            let created = tx.create_apply_post(apply_post, Utc::now()).await?;
            tx.commit().await?;

            let mut tx = self.store.begin().await?;
            let post = tx.get_post(created.post_id).await?;
            let applications = tx.list_apply_posts_by_post_id(post.id).await?;
            if over_capacity(&applications, post.max_apply, created.id) {
                tx.delete_apply_post(created.id).await?;
                tx.commit().await?;
                metrics::counter!("apply_post_compensations_total").increment(1);
                tracing::warn!(
                    post_id = %post.id,
                    apply_post_id = %created.id,
                    max_apply = post.max_apply,
                    "removed application that exceeded max_apply"
                );
                return Err(PostError::MaxApplyReached {
                    post_id: post.id,
                    max_apply: post.max_apply,
                }
                .into());
            }

            metrics::counter!("apply_posts_created_total").increment(1);
            tracing::info!(post_id = %post.id, apply_post_id = %created.id, "application created");
            Ok(created)
        })
        .await
    }

    /// Withdraws an application on behalf of the applicant.
    #[tracing::instrument(skip(self))]
    pub async fn delete_apply_post(
        &self,
        id: ApplyPostId,
        user_id: UserId,
    ) -> Result<(), DomainError> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            let apply_post = tx.get_apply_post(id).await?;
            if apply_post.user_id != user_id {
                return Err(PostError::PermissionDenied {
                    user_id,
                    entity: "apply_post",
                    id: id.to_string(),
                }
                .into());
            }
            tx.delete_apply_post(id).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }
}

/// Returns true if `id` is not among the first `max_apply` applications in
/// creation order.
fn over_capacity(applications: &[ApplyPost], max_apply: i64, id: ApplyPostId) -> bool {
    let mut ids: Vec<ApplyPostId> = applications.iter().map(|a| a.id).collect();
    ids.sort_unstable();
    match ids.iter().position(|&a| a == id) {
        Some(position) => position as i64 >= max_apply,
        None => false,
    }
}
