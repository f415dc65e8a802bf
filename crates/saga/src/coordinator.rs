//! Saga coordinator exposing the CreatePost use case and reply handling.

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{NewPost, Post, SagaId};
use domain::{ServiceConfig, validation};
use serde::Serialize;
use storage::Store;

use crate::error::{Result, SagaError};
use crate::manager::{self, CreatePostSaga, CreatePostSagaManager, SAGA_TYPE};
use crate::reply::{SagaReply, SagaReplyDispatcher};
use crate::state::CreatePostSagaState;

/// Read view of a stored saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaSummary {
    pub saga_id: SagaId,
    pub saga_type: String,
    pub current_state: CreatePostSagaState,
    /// The post as of the last committed transition.
    pub post: Post,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Orchestrates CreatePost sagas.
///
/// `create_post` returns as soon as the `CreateRoom` transition commits; it
/// never waits for the room service. Replies arrive later through
/// `room_created`, `create_room_failed` or `handle_reply`.
#[derive(Clone)]
pub struct SagaCoordinator<S: Store> {
    store: S,
    manager: CreatePostSagaManager<S>,
    replies: SagaReplyDispatcher<S>,
    config: ServiceConfig,
}

impl<S: Store> SagaCoordinator<S> {
    /// Creates a new saga coordinator.
    pub fn new(store: S, config: ServiceConfig) -> Self {
        Self {
            manager: CreatePostSagaManager::new(store.clone()),
            replies: SagaReplyDispatcher::new(store.clone()),
            store,
            config,
        }
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| SagaError::Timeout(self.config.timeout))?
    }

    /// Validates and persists a post, then starts its saga.
    ///
    /// Returns the saga ID once the post, the saga instance and the
    /// `create.room` event are committed together.
    #[tracing::instrument(skip(self, post), fields(saga_type = SAGA_TYPE, user_id = %post.user_id))]
    pub async fn create_post(&self, post: NewPost) -> Result<SagaId> {
        metrics::counter!("saga_executions_total").increment(1);
        let post = validation::validate_new_post(post).map_err(domain::DomainError::from)?;

        let saga = self.with_timeout(self.manager.start(post)).await?;

        metrics::counter!("posts_created_total").increment(1);
        tracing::info!(saga_id = %saga.id(), post_id = %saga.post().id, "saga started");
        Ok(saga.id())
    }

    /// Handles a successful room creation.
    pub async fn room_created(&self, saga_id: SagaId) -> Result<CreatePostSaga> {
        self.with_timeout(self.replies.room_created(saga_id)).await
    }

    /// Handles a failed room creation.
    pub async fn create_room_failed(
        &self,
        saga_id: SagaId,
        error_message: &str,
    ) -> Result<CreatePostSaga> {
        self.with_timeout(self.replies.create_room_failed(saga_id, error_message))
            .await
    }

    /// Handles a decoded reply envelope.
    pub async fn handle_reply(&self, reply: SagaReply) -> Result<CreatePostSaga> {
        let started = Instant::now();
        let result = self.with_timeout(self.replies.dispatch(reply)).await;
        metrics::histogram!("saga_reply_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    /// Loads the stored view of a saga.
    #[tracing::instrument(skip(self))]
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<SagaSummary> {
        self.with_timeout(async {
            let mut tx = self.store.begin().await?;
            let instance = manager::load_instance(&mut tx, saga_id).await?;
            let saga = CreatePostSaga::rehydrate(&instance)?;

            Ok(SagaSummary {
                saga_id: instance.id,
                saga_type: instance.saga_type,
                current_state: saga.state(),
                post: saga.post().clone(),
                created_at: instance.created_at,
                updated_at: instance.updated_at,
            })
        })
        .await
    }
}
