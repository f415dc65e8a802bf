//! Application endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ApplyPost, ApplyPostId, PostId, UserId};
use serde::Deserialize;
use storage::Store;

use super::{ActingUser, AppState, parse_id_list};
use crate::error::ApiError;

/// Query string of `GET /apply-posts`. Exactly one selector must be set.
#[derive(Debug, Default, Deserialize)]
pub struct ListApplyPostsQuery {
    pub user_id: Option<UserId>,
    pub post_id: Option<PostId>,
    /// Comma-separated post IDs for a batch lookup.
    pub post_ids: Option<String>,
}

/// GET /apply-posts?user_id=|post_id=|post_ids=
#[tracing::instrument(skip(state))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListApplyPostsQuery>,
) -> Result<Json<Vec<ApplyPost>>, ApiError> {
    let service = &state.post_service;
    let apply_posts = match (query.user_id, query.post_id, query.post_ids.as_deref()) {
        (Some(user_id), None, None) => service.list_apply_posts_by_user_id(user_id).await?,
        (None, Some(post_id), None) => service.list_apply_posts_by_post_id(post_id).await?,
        (None, None, Some(raw)) => {
            let post_ids: Vec<PostId> = parse_id_list(Some(raw))?;
            service.batch_get_apply_posts_by_post_ids(&post_ids).await?
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of user_id, post_id or post_ids is required".to_string(),
            ));
        }
    };
    Ok(Json(apply_posts))
}

/// GET /apply-posts/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ApplyPostId>,
) -> Result<Json<ApplyPost>, ApiError> {
    Ok(Json(state.post_service.get_apply_post(id).await?))
}

/// DELETE /apply-posts/{id}?user_id= — withdraws an application.
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ApplyPostId>,
    Query(user): Query<ActingUser>,
) -> Result<StatusCode, ApiError> {
    state.post_service.delete_apply_post(id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
