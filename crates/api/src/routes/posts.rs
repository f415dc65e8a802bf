//! Post endpoints: creation through the saga, listing, edits and
//! applications.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{
    ApplyPost, NewApplyPost, NewPost, OrderBy, Post, PostFilter, PostId, PostUpdate, SagaId,
    SortBy, UserId,
};
use domain::PostPage;
use serde::{Deserialize, Serialize};
use storage::Store;

use super::{ActingUser, AppState, parse_id_list};
use crate::error::ApiError;

// -- Request types --

/// Query string of `GET /posts`. List values are comma separated.
#[derive(Debug, Default, Deserialize)]
pub struct ListPostsQuery {
    pub user_id: Option<UserId>,
    pub prefecture_id: Option<i64>,
    pub fishing_spot_type_id: Option<i64>,
    pub fish_type_ids: Option<String>,
    #[serde(default)]
    pub can_apply: bool,
    pub meeting_at_from: Option<DateTime<Utc>>,
    pub meeting_at_to: Option<DateTime<Utc>>,
    pub sort_by: Option<SortBy>,
    pub order_by: Option<OrderBy>,
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
}

impl ListPostsQuery {
    fn filter(&self) -> Result<PostFilter, ApiError> {
        Ok(PostFilter {
            user_id: self.user_id,
            prefecture_id: self.prefecture_id,
            fishing_spot_type_id: self.fishing_spot_type_id,
            fish_type_ids: parse_id_list(self.fish_type_ids.as_deref())?,
            can_apply: self.can_apply,
            meeting_at_from: self.meeting_at_from,
            meeting_at_to: self.meeting_at_to,
            sort_by: self.sort_by.unwrap_or_default(),
            order_by: self.order_by.unwrap_or_default(),
        })
    }
}

/// Body of `PUT /posts/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub fishing_spot_type_id: i64,
    pub prefecture_id: i64,
    pub meeting_place_id: String,
    pub meeting_at: DateTime<Utc>,
    pub max_apply: i64,
    pub fish_type_ids: Vec<i64>,
}

impl UpdatePostRequest {
    fn into_update(self, id: PostId) -> PostUpdate {
        PostUpdate {
            id,
            user_id: self.user_id,
            title: self.title,
            content: self.content,
            fishing_spot_type_id: self.fishing_spot_type_id,
            prefecture_id: self.prefecture_id,
            meeting_place_id: self.meeting_place_id,
            meeting_at: self.meeting_at,
            max_apply: self.max_apply,
            fish_type_ids: self.fish_type_ids,
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct PostCreatedResponse {
    pub saga_id: SagaId,
}

// -- Handlers --

/// POST /posts — validates the post and starts its CreatePost saga.
///
/// Answers as soon as the post, the saga instance and the `create.room`
/// event are committed; the room is created asynchronously.
#[tracing::instrument(skip(state, post))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(post): Json<NewPost>,
) -> Result<(StatusCode, Json<PostCreatedResponse>), ApiError> {
    let saga_id = state.saga_coordinator.create_post(post).await?;
    Ok((StatusCode::CREATED, Json(PostCreatedResponse { saga_id })))
}

/// GET /posts — lists one page of posts.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<PostPage>, ApiError> {
    let filter = query.filter()?;
    let page = state
        .post_service
        .list_posts(&filter, query.page_size, query.page_token.as_deref())
        .await?;
    Ok(Json(page))
}

/// GET /posts/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PostId>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(state.post_service.get_post(id).await?))
}

/// PUT /posts/{id} — replaces the editable fields on behalf of the owner.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PostId>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<Json<Post>, ApiError> {
    let post = state.post_service.update_post(req.into_update(id)).await?;
    Ok(Json(post))
}

/// DELETE /posts/{id}?user_id=
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PostId>,
    Query(user): Query<ActingUser>,
) -> Result<StatusCode, ApiError> {
    state.post_service.delete_post(id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /posts/{id}/apply-posts — applies the user in the body to the post.
#[tracing::instrument(skip(state))]
pub async fn apply<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(post_id): Path<PostId>,
    Json(user): Json<ActingUser>,
) -> Result<(StatusCode, Json<ApplyPost>), ApiError> {
    let apply_post = state
        .post_service
        .create_apply_post(NewApplyPost {
            post_id,
            user_id: user.user_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(apply_post)))
}

/// GET /posts/{id}/apply-posts
#[tracing::instrument(skip(state))]
pub async fn list_applications<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(post_id): Path<PostId>,
) -> Result<Json<Vec<ApplyPost>>, ApiError> {
    let apply_posts = state
        .post_service
        .list_apply_posts_by_post_id(post_id)
        .await?;
    Ok(Json(apply_posts))
}
