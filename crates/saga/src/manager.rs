//! CreatePost saga manager.
//!
//! A transition stages all of its side effects in one transaction: the
//! compensating delete (reject only), the outbox event and the saga instance
//! write. The in-memory state advances only after that transaction commits,
//! so a failure anywhere leaves both the saga object and the stored row in
//! the previous state.

use chrono::{DateTime, Utc};
use common::{NewPost, Post, SagaId};
use storage::{OutboxStore, PostStore, SagaInstance, SagaInstanceStore, Store, Transaction};

use crate::error::{Result, SagaError};
use crate::events;
use crate::snapshot;
use crate::state::{self, CreatePostSagaState, SagaEvent, SideEffect, Transition};

/// Saga type recorded in `saga_instance.saga_type`.
pub const SAGA_TYPE: &str = "CreatePostSaga";

/// In-memory state of one CreatePost saga.
///
/// Not kept resident between steps: each reply rebuilds it from the stored
/// saga instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePostSaga {
    id: SagaId,
    post: Post,
    state: CreatePostSagaState,
    created_at: DateTime<Utc>,
}

impl CreatePostSaga {
    /// Creates a saga in the initial state for an already persisted post.
    pub fn new(id: SagaId, post: Post) -> Self {
        Self {
            id,
            post,
            state: CreatePostSagaState::Init,
            created_at: Utc::now(),
        }
    }

    /// Rebuilds a saga from its stored instance, starting in the persisted
    /// state.
    pub fn rehydrate(instance: &SagaInstance) -> Result<Self> {
        if instance.saga_type != SAGA_TYPE {
            return Err(SagaError::UnexpectedSagaType {
                saga_id: instance.id,
                saga_type: instance.saga_type.clone(),
                expected: SAGA_TYPE,
            });
        }
        let state = instance
            .current_state
            .parse()
            .map_err(SagaError::UnknownState)?;
        let post = snapshot::decode(&instance.saga_data)?;

        Ok(Self {
            id: instance.id,
            post,
            state,
            created_at: instance.created_at,
        })
    }

    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Returns the orchestrated post as of the last transition.
    pub fn post(&self) -> &Post {
        &self.post
    }

    pub fn state(&self) -> CreatePostSagaState {
        self.state
    }

    /// Builds the stored row for this saga tagged with `state`.
    fn to_instance(&self, state: CreatePostSagaState, now: DateTime<Utc>) -> Result<SagaInstance> {
        Ok(SagaInstance {
            id: self.id,
            saga_type: SAGA_TYPE.to_string(),
            saga_data: snapshot::encode(&self.post)?,
            current_state: state.as_str().to_string(),
            created_at: self.created_at,
            updated_at: now,
        })
    }
}

/// Drives CreatePost sagas through their transition table.
#[derive(Clone)]
pub struct CreatePostSagaManager<S: Store> {
    store: S,
}

impl<S: Store> CreatePostSagaManager<S> {
    /// Creates a new manager over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists a new post and fires `CreateRoom` in the same transaction.
    ///
    /// Either the post, the saga instance and the `create.room` event are
    /// all committed, or none of them are.
    #[tracing::instrument(skip(self, post), fields(saga_type = SAGA_TYPE))]
    pub async fn start(&self, post: NewPost) -> Result<CreatePostSaga> {
        let transition = self.lookup(SagaEvent::CreateRoom, CreatePostSagaState::Init)?;

        let result: Result<CreatePostSaga> = async {
            let mut tx = self.store.begin().await?;
            let post = tx.create_post(post, Utc::now()).await?;
            let saga = CreatePostSaga::new(SagaId::new(), post);
            stage(&mut tx, &saga, transition).await?;
            tx.commit().await?;
            Ok(saga)
        }
        .await;

        match result {
            Ok(mut saga) => {
                self.advance(&mut saga, transition);
                Ok(saga)
            }
            Err(e) => Err(self.failed(transition, e)),
        }
    }

    /// Fires `event` on `saga`.
    ///
    /// Events with no row in the transition table fail with
    /// `InvalidTransition` before anything is written.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id, state = %saga.state))]
    pub async fn fire(&self, saga: &mut CreatePostSaga, event: SagaEvent) -> Result<()> {
        let transition = self.lookup(event, saga.state)?;

        let result: Result<()> = async {
            let mut tx = self.store.begin().await?;
            stage(&mut tx, saga, transition).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.advance(saga, transition);
                Ok(())
            }
            Err(e) => Err(self.failed(transition, e)),
        }
    }

    fn lookup(&self, event: SagaEvent, src: CreatePostSagaState) -> Result<&'static Transition> {
        state::transition(event, src).ok_or_else(|| {
            metrics::counter!("saga_transition_failures_total").increment(1);
            tracing::warn!(%event, state = %src, "rejected saga transition");
            SagaError::InvalidTransition { event, state: src }
        })
    }

    fn advance(&self, saga: &mut CreatePostSaga, transition: &Transition) {
        saga.state = transition.dst;

        metrics::counter!("saga_transitions_total").increment(1);
        if transition.side_effect.is_compensation() {
            metrics::counter!("saga_compensations_total").increment(1);
        }
        tracing::info!(
            saga_id = %saga.id,
            post_id = %saga.post.id,
            event = %transition.event,
            from = %transition.src,
            to = %transition.dst,
            "saga transition committed"
        );
    }

    fn failed(&self, transition: &Transition, error: SagaError) -> SagaError {
        metrics::counter!("saga_transition_failures_total").increment(1);
        tracing::warn!(
            event = %transition.event,
            from = %transition.src,
            error = %error,
            "saga transition rolled back"
        );
        error
    }
}

/// Reads the saga instance stored under `saga_id`.
///
/// A missing row means the saga is unknown, not that some other entity is.
pub(crate) async fn load_instance<T: Transaction>(
    tx: &mut T,
    saga_id: SagaId,
) -> Result<SagaInstance> {
    tx.get_saga_instance(saga_id).await.map_err(|e| {
        if e.is_not_found() {
            SagaError::SagaNotFound(saga_id)
        } else {
            e.into()
        }
    })
}

/// Writes every side effect of `transition` into `tx`.
///
/// The saga instance is stored with the destination state. Updates are
/// conditional on the row still being in the source state, so two replies
/// racing for one saga cannot both succeed.
async fn stage<T: Transaction>(
    tx: &mut T,
    saga: &CreatePostSaga,
    transition: &Transition,
) -> Result<()> {
    if transition.side_effect == SideEffect::CompensatePost {
        tx.delete_post(saga.post.id).await?;
    }

    let record = events::outbox_record(transition.side_effect, saga)?;
    tx.create_outbox(&record).await?;

    let instance = saga.to_instance(transition.dst, Utc::now())?;
    if transition.src == CreatePostSagaState::Init {
        tx.create_saga_instance(&instance).await?;
    } else {
        tx.update_saga_instance(&instance, transition.src.as_str())
            .await?;
    }
    Ok(())
}
