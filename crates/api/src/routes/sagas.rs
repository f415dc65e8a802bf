//! Saga inspection and reply intake.
//!
//! `POST /saga-replies` is the HTTP face of the `create.post.saga.reply`
//! subject: a relay or the room service posts the raw reply envelope here.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use common::SagaId;
use saga::{CreatePostSagaState, SagaReply, SagaSummary};
use serde::Serialize;
use storage::Store;

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct ReplyHandledResponse {
    pub saga_id: SagaId,
    pub current_state: CreatePostSagaState,
}

/// GET /sagas/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<SagaId>,
) -> Result<Json<SagaSummary>, ApiError> {
    Ok(Json(state.saga_coordinator.get_saga(id).await?))
}

/// POST /saga-replies — decodes a reply envelope and advances its saga.
#[tracing::instrument(skip(state, body), fields(len = body.len()))]
pub async fn reply<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Result<Json<ReplyHandledResponse>, ApiError> {
    let reply = SagaReply::decode(&body)?;
    let saga = state.saga_coordinator.handle_reply(reply).await?;
    Ok(Json(ReplyHandledResponse {
        saga_id: saga.id(),
        current_state: saga.state(),
    }))
}
