use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    ApplyPost, ApplyPostId, NewApplyPost, NewPost, OrderBy, Post, PostFilter, PostId, SagaId,
    SortBy, UserId,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    ApplyPostStore, OutboxRecord, OutboxStore, PostStore, Result, SagaInstance, SagaInstanceStore,
    Store, StoreError, Transaction,
};

/// An operation of the in-memory store that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Commit,
    CreatePost,
    UpdatePost,
    DeletePost,
    CreateApplyPost,
    DeleteApplyPost,
    CreateOutbox,
    CreateSagaInstance,
    UpdateSagaInstance,
}

impl std::fmt::Display for FailPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    posts: BTreeMap<PostId, Post>,
    apply_posts: BTreeMap<ApplyPostId, ApplyPost>,
    outbox: Vec<OutboxRecord>,
    saga_instances: HashMap<SagaId, SagaInstance>,
    last_post_id: i64,
    last_apply_post_id: i64,
}

impl Tables {
    fn apply_count(&self, post_id: PostId) -> i64 {
        self.apply_posts
            .values()
            .filter(|a| a.post_id == post_id)
            .count() as i64
    }
}

type Faults = Arc<Mutex<HashSet<FailPoint>>>;

type CommitHook = Pin<Box<dyn Future<Output = ()> + Send>>;
type CommitHooks = Arc<Mutex<Option<CommitHook>>>;

fn trip(faults: &Faults, point: FailPoint) -> Result<()> {
    let armed = faults
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&point);
    if armed {
        return Err(StoreError::Unavailable(format!(
            "injected failure at {point}"
        )));
    }
    Ok(())
}

/// In-memory store implementation for testing.
///
/// A transaction holds the table lock for its whole lifetime and works on a
/// staged copy of the tables, so transactions are fully serialized. Commit
/// publishes the copy; rollback or drop discards it.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Faults,
    after_commit: CommitHooks,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `point` fail with `StoreError::Unavailable`.
    pub fn fail_on(&self, point: FailPoint) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(point);
    }

    /// Disarms every pending failure.
    pub fn clear_faults(&self) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Runs `hook` right after the next successful commit, once the table
    /// lock is released. The hook may open its own transactions, which lets
    /// a test land a write between two transactions of one operation.
    pub fn after_next_commit(&self, hook: impl Future<Output = ()> + Send + 'static) {
        *self
            .after_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::pin(hook));
    }

    /// Returns every committed outbox row, oldest first.
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.tables.lock().await.outbox.clone()
    }

    /// Returns the committed saga instance with the given ID, if any.
    pub async fn saga_instance(&self, id: SagaId) -> Option<SagaInstance> {
        self.tables.lock().await.saga_instances.get(&id).cloned()
    }

    pub async fn post_count(&self) -> usize {
        self.tables.lock().await.posts.len()
    }

    pub async fn apply_post_count(&self) -> usize {
        self.tables.lock().await.apply_posts.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        trip(&self.faults, FailPoint::Begin)?;
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTx {
            guard,
            staged,
            faults: self.faults.clone(),
            after_commit: self.after_commit.clone(),
        })
    }
}

/// Transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    faults: Faults,
    after_commit: CommitHooks,
}

#[async_trait]
impl Transaction for InMemoryTx {
    async fn commit(self) -> Result<()> {
        trip(&self.faults, FailPoint::Commit)?;
        let InMemoryTx {
            mut guard,
            staged,
            after_commit,
            ..
        } = self;
        *guard = staged;
        drop(guard);

        let hook = after_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook.await;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryTx {
    async fn create_outbox(&mut self, record: &OutboxRecord) -> Result<()> {
        trip(&self.faults, FailPoint::CreateOutbox)?;
        if self.staged.outbox.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Duplicate {
                entity: "outbox",
                id: record.id.to_string(),
            });
        }
        self.staged.outbox.push(record.clone());
        Ok(())
    }

    async fn list_outbox_by_aggregate(
        &mut self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<OutboxRecord>> {
        Ok(self
            .staged
            .outbox
            .iter()
            .filter(|r| r.aggregate_type == aggregate_type && r.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SagaInstanceStore for InMemoryTx {
    async fn create_saga_instance(&mut self, instance: &SagaInstance) -> Result<()> {
        trip(&self.faults, FailPoint::CreateSagaInstance)?;
        if self.staged.saga_instances.contains_key(&instance.id) {
            return Err(StoreError::Duplicate {
                entity: "saga_instance",
                id: instance.id.to_string(),
            });
        }
        self.staged
            .saga_instances
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_saga_instance(
        &mut self,
        instance: &SagaInstance,
        expected_state: &str,
    ) -> Result<()> {
        trip(&self.faults, FailPoint::UpdateSagaInstance)?;
        let row = self
            .staged
            .saga_instances
            .get_mut(&instance.id)
            .ok_or_else(|| StoreError::not_found("saga_instance", instance.id))?;
        if row.current_state != expected_state {
            return Err(StoreError::StateConflict {
                saga_id: instance.id,
                expected: expected_state.to_string(),
                actual: row.current_state.clone(),
            });
        }
        row.saga_data = instance.saga_data.clone();
        row.current_state = instance.current_state.clone();
        row.updated_at = instance.updated_at;
        Ok(())
    }

    async fn get_saga_instance(&mut self, id: SagaId) -> Result<SagaInstance> {
        self.staged
            .saga_instances
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("saga_instance", id))
    }
}

fn matches_filter(tables: &Tables, filter: &PostFilter, post: &Post) -> bool {
    if let Some(user_id) = filter.user_id
        && post.user_id != user_id
    {
        return false;
    }
    if let Some(prefecture_id) = filter.prefecture_id
        && post.prefecture_id != prefecture_id
    {
        return false;
    }
    if let Some(spot) = filter.fishing_spot_type_id
        && post.fishing_spot_type_id != spot
    {
        return false;
    }
    if !filter
        .fish_type_ids
        .iter()
        .all(|f| post.fish_type_ids.contains(f))
    {
        return false;
    }
    if let (Some(from), Some(to)) = (filter.meeting_at_from, filter.meeting_at_to)
        && (post.meeting_at < from || post.meeting_at > to)
    {
        return false;
    }
    if filter.can_apply && tables.apply_count(post.id) >= post.max_apply {
        return false;
    }
    true
}

fn sort_key(sort_by: SortBy, post: &Post) -> (Option<DateTime<Utc>>, PostId) {
    match sort_by {
        SortBy::Id => (None, post.id),
        SortBy::MeetingAt => (Some(post.meeting_at), post.id),
    }
}

#[async_trait]
impl PostStore for InMemoryTx {
    async fn create_post(&mut self, post: NewPost, now: DateTime<Utc>) -> Result<Post> {
        trip(&self.faults, FailPoint::CreatePost)?;
        self.staged.last_post_id += 1;
        let post = post.into_post(PostId::new(self.staged.last_post_id), now);
        self.staged.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn get_post(&mut self, id: PostId) -> Result<Post> {
        self.staged
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("post", id))
    }

    async fn update_post(&mut self, post: &Post) -> Result<()> {
        trip(&self.faults, FailPoint::UpdatePost)?;
        let row = self
            .staged
            .posts
            .get_mut(&post.id)
            .ok_or_else(|| StoreError::not_found("post", post.id))?;
        *row = post.clone();
        Ok(())
    }

    async fn delete_post(&mut self, id: PostId) -> Result<()> {
        trip(&self.faults, FailPoint::DeletePost)?;
        self.staged
            .posts
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("post", id))?;
        self.staged.apply_posts.retain(|_, a| a.post_id != id);
        Ok(())
    }

    async fn list_posts(
        &mut self,
        filter: &PostFilter,
        limit: i64,
        cursor: Option<PostId>,
    ) -> Result<Vec<Post>> {
        // Id order needs only the cursor ID, so a deleted cursor row still pages.
        let cursor_key = match (cursor, filter.sort_by) {
            (None, _) => None,
            (Some(id), SortBy::Id) => Some((None, id)),
            (Some(id), SortBy::MeetingAt) => {
                let post = self
                    .staged
                    .posts
                    .get(&id)
                    .ok_or_else(|| StoreError::not_found("post", id))?;
                Some(sort_key(SortBy::MeetingAt, post))
            }
        };

        let mut posts: Vec<Post> = self
            .staged
            .posts
            .values()
            .filter(|p| matches_filter(&self.staged, filter, p))
            .filter(|p| match &cursor_key {
                Some(key) => match filter.order_by {
                    OrderBy::Asc => sort_key(filter.sort_by, p) > *key,
                    OrderBy::Desc => sort_key(filter.sort_by, p) < *key,
                },
                None => true,
            })
            .cloned()
            .collect();

        posts.sort_by_key(|p| sort_key(filter.sort_by, p));
        if filter.order_by == OrderBy::Desc {
            posts.reverse();
        }
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }
}

#[async_trait]
impl ApplyPostStore for InMemoryTx {
    async fn create_apply_post(
        &mut self,
        apply_post: NewApplyPost,
        now: DateTime<Utc>,
    ) -> Result<ApplyPost> {
        trip(&self.faults, FailPoint::CreateApplyPost)?;
        if !self.staged.posts.contains_key(&apply_post.post_id) {
            return Err(StoreError::not_found("post", apply_post.post_id));
        }
        let taken = self
            .staged
            .apply_posts
            .values()
            .any(|a| a.post_id == apply_post.post_id && a.user_id == apply_post.user_id);
        if taken {
            return Err(StoreError::Duplicate {
                entity: "apply_post",
                id: format!("{}/{}", apply_post.post_id, apply_post.user_id),
            });
        }

        self.staged.last_apply_post_id += 1;
        let row = ApplyPost {
            id: ApplyPostId::new(self.staged.last_apply_post_id),
            post_id: apply_post.post_id,
            user_id: apply_post.user_id,
            created_at: now,
            updated_at: now,
        };
        self.staged.apply_posts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_apply_post(&mut self, id: ApplyPostId) -> Result<ApplyPost> {
        self.staged
            .apply_posts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("apply_post", id))
    }

    async fn delete_apply_post(&mut self, id: ApplyPostId) -> Result<()> {
        trip(&self.faults, FailPoint::DeleteApplyPost)?;
        self.staged
            .apply_posts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("apply_post", id))
    }

    async fn count_apply_posts_by_post_id(&mut self, post_id: PostId) -> Result<i64> {
        Ok(self.staged.apply_count(post_id))
    }

    async fn list_apply_posts_by_user_id(&mut self, user_id: UserId) -> Result<Vec<ApplyPost>> {
        Ok(self
            .staged
            .apply_posts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_apply_posts_by_post_id(&mut self, post_id: PostId) -> Result<Vec<ApplyPost>> {
        Ok(self
            .staged
            .apply_posts
            .values()
            .filter(|a| a.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn batch_get_apply_posts_by_post_ids(
        &mut self,
        post_ids: &[PostId],
    ) -> Result<Vec<ApplyPost>> {
        Ok(self
            .staged
            .apply_posts
            .values()
            .filter(|a| post_ids.contains(&a.post_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_post(user_id: i64, max_apply: i64) -> NewPost {
        NewPost {
            title: "Sea bass".to_string(),
            content: "Meet at the pier".to_string(),
            fishing_spot_type_id: 1,
            prefecture_id: 13,
            meeting_place_id: "pier".to_string(),
            meeting_at: Utc::now(),
            max_apply,
            user_id: UserId::new(user_id),
            fish_type_ids: vec![1, 2],
        }
    }

    fn saga_instance(state: &str) -> SagaInstance {
        let now = Utc::now();
        SagaInstance {
            id: SagaId::new(),
            saga_type: "CreatePostSaga".to_string(),
            saga_data: b"{}".to_vec(),
            current_state: state.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let post = tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_post(post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
            tx.create_outbox(&OutboxRecord::new("x", "post", "1", vec![]))
                .await
                .unwrap();
        }
        assert_eq!(store.post_count().await, 0);
        assert!(store.outbox_records().await.is_empty());
    }

    #[tokio::test]
    async fn explicit_rollback_discards_writes() {
        let store = InMemoryStore::new();
        let instance = saga_instance("CreatingRoom");
        let mut tx = store.begin().await.unwrap();
        tx.create_saga_instance(&instance).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.saga_instance(instance.id).await.is_none());
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_behind() {
        let store = InMemoryStore::new();
        store.fail_on(FailPoint::Commit);

        let mut tx = store.begin().await.unwrap();
        tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        let err = tx.commit().await.unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.post_count().await, 0);
    }

    #[tokio::test]
    async fn fail_points_fire_once() {
        let store = InMemoryStore::new();
        store.fail_on(FailPoint::CreateOutbox);

        let mut tx = store.begin().await.unwrap();
        let record = OutboxRecord::new("create.room", "post", "1", vec![]);
        assert!(tx.create_outbox(&record).await.is_err());
        assert!(tx.create_outbox(&record).await.is_ok());
    }

    #[tokio::test]
    async fn saga_instance_ids_are_unique() {
        let store = InMemoryStore::new();
        let instance = saga_instance("CreatingRoom");

        let mut tx = store.begin().await.unwrap();
        tx.create_saga_instance(&instance).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.create_saga_instance(&instance).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn update_requires_expected_state() {
        let store = InMemoryStore::new();
        let mut instance = saga_instance("CreatingRoom");

        let mut tx = store.begin().await.unwrap();
        tx.create_saga_instance(&instance).await.unwrap();

        instance.current_state = "PostApproved".to_string();
        let err = tx
            .update_saga_instance(&instance, "init")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StateConflict { .. }));

        tx.update_saga_instance(&instance, "CreatingRoom")
            .await
            .unwrap();
        let loaded = tx.get_saga_instance(instance.id).await.unwrap();
        assert_eq!(loaded.current_state, "PostApproved");
    }

    #[tokio::test]
    async fn update_of_missing_instance_is_not_found() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update_saga_instance(&saga_instance("PostApproved"), "CreatingRoom")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_post_removes_applications() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let post = tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        tx.create_apply_post(
            NewApplyPost {
                post_id: post.id,
                user_id: UserId::new(2),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        tx.delete_post(post.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.post_count().await, 0);
        assert_eq!(store.apply_post_count().await, 0);
    }

    #[tokio::test]
    async fn user_applies_once_per_post() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let post = tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        let apply = NewApplyPost {
            post_id: post.id,
            user_id: UserId::new(2),
        };
        tx.create_apply_post(apply, Utc::now()).await.unwrap();
        let err = tx.create_apply_post(apply, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(tx.count_apply_posts_by_post_id(post.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_posts_pages_by_id() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..5 {
            tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        }

        let filter = PostFilter::default();
        let page = tx.list_posts(&filter, 2, None).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![5, 4]);

        let page = tx.list_posts(&filter, 2, Some(PostId::new(4))).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn list_posts_filters_by_capacity_and_fish() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let full = tx.create_post(new_post(1, 1), Utc::now()).await.unwrap();
        let mut other = new_post(1, 1);
        other.fish_type_ids = vec![3];
        let open = tx.create_post(other, Utc::now()).await.unwrap();
        tx.create_apply_post(
            NewApplyPost {
                post_id: full.id,
                user_id: UserId::new(9),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let filter = PostFilter {
            can_apply: true,
            ..Default::default()
        };
        let page = tx.list_posts(&filter, 10, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, open.id);

        let filter = PostFilter {
            fish_type_ids: vec![1, 2],
            ..Default::default()
        };
        let page = tx.list_posts(&filter, 10, None).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, full.id);
    }

    #[tokio::test]
    async fn id_cursor_survives_deleted_row() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..3 {
            tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        }
        tx.delete_post(PostId::new(3)).await.unwrap();

        let page = tx
            .list_posts(&PostFilter::default(), 10, Some(PostId::new(3)))
            .await
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn meeting_at_cursor_must_exist() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let filter = PostFilter {
            sort_by: SortBy::MeetingAt,
            ..Default::default()
        };
        let err = tx
            .list_posts(&filter, 10, Some(PostId::new(99)))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn commit_hook_runs_once_after_lock_release() {
        let store = InMemoryStore::new();
        let racer = store.clone();
        store.after_next_commit(async move {
            let mut tx = racer.begin().await.unwrap();
            tx.create_post(new_post(2, 3), Utc::now()).await.unwrap();
            tx.commit().await.unwrap();
        });

        let mut tx = store.begin().await.unwrap();
        tx.create_post(new_post(1, 3), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.post_count().await, 2);

        let tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.post_count().await, 2);
    }

    #[tokio::test]
    async fn commit_hook_skips_failed_commit() {
        let store = InMemoryStore::new();
        let racer = store.clone();
        store.after_next_commit(async move {
            let mut tx = racer.begin().await.unwrap();
            tx.create_post(new_post(2, 3), Utc::now()).await.unwrap();
            tx.commit().await.unwrap();
        });
        store.fail_on(FailPoint::Commit);

        let tx = store.begin().await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.post_count().await, 0);

        let tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.post_count().await, 1);
    }
}
