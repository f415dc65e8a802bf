use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    ApplyPost, ApplyPostId, NewApplyPost, NewPost, OrderBy, OutboxId, Post, PostFilter, PostId,
    SagaId, SortBy, UserId,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ApplyPostStore, OutboxRecord, OutboxStore, PostStore, Result, SagaInstance, SagaInstanceStore,
    Store, StoreError, Transaction,
};

const POST_COLUMNS: &str = "p.id, p.title, p.content, p.fishing_spot_type_id, p.prefecture_id, \
     p.meeting_place_id, p.meeting_at, p.max_apply, p.user_id, p.created_at, p.updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTx { tx })
    }
}

/// Transaction over [`PostgresStore`]. Dropping it without committing rolls
/// the database transaction back.
pub struct PostgresTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl Transaction for PostgresTx {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }
}

fn map_insert_error(e: sqlx::Error, entity: &'static str, id: impl ToString) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate {
                entity,
                id: id.to_string(),
            };
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::NotFound {
                entity: "post",
                id: id.to_string(),
            };
        }
    }
    StoreError::Database(e)
}

/// Zero rows means the keyed row is gone; anything but one is a violation.
fn check_keyed_write(affected: u64, entity: &'static str, id: impl ToString) -> Result<()> {
    if affected == 0 {
        return Err(StoreError::not_found(entity, id));
    }
    StoreError::check_rows(1, affected)
}

fn row_to_post(row: &PgRow) -> Result<Post> {
    Ok(Post {
        id: PostId::new(row.try_get("id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        fishing_spot_type_id: row.try_get("fishing_spot_type_id")?,
        prefecture_id: row.try_get("prefecture_id")?,
        meeting_place_id: row.try_get("meeting_place_id")?,
        meeting_at: row.try_get("meeting_at")?,
        max_apply: row.try_get("max_apply")?,
        user_id: UserId::new(row.try_get("user_id")?),
        fish_type_ids: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_apply_post(row: &PgRow) -> Result<ApplyPost> {
    Ok(ApplyPost {
        id: ApplyPostId::new(row.try_get("id")?),
        post_id: PostId::new(row.try_get("post_id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_outbox(row: &PgRow) -> Result<OutboxRecord> {
    Ok(OutboxRecord {
        id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_type: row.try_get("event_type")?,
        event_data: row.try_get("event_data")?,
        channel: row.try_get("channel")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_saga_instance(row: &PgRow) -> Result<SagaInstance> {
    Ok(SagaInstance {
        id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
        saga_type: row.try_get("saga_type")?,
        saga_data: row.try_get("saga_data")?,
        current_state: row.try_get("current_state")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl PostgresTx {
    async fn insert_fish_types(
        &mut self,
        post_id: PostId,
        fish_type_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if fish_type_ids.is_empty() {
            return Ok(());
        }
        let result = sqlx::query(
            r#"
            INSERT INTO posts_fish_types (post_id, fish_type_id, created_at, updated_at)
            SELECT $1, f, $2, $2 FROM UNNEST($3::BIGINT[]) AS f
            "#,
        )
        .bind(post_id.as_i64())
        .bind(now)
        .bind(fish_type_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, "posts_fish_type", post_id))?;

        StoreError::check_rows(fish_type_ids.len() as u64, result.rows_affected())
    }

    async fn fill_fish_types(&mut self, posts: &mut [Post]) -> Result<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = posts.iter().map(|p| p.id.as_i64()).collect();
        let rows = sqlx::query(
            r#"
            SELECT post_id, fish_type_id
            FROM posts_fish_types
            WHERE post_id = ANY($1)
            ORDER BY fish_type_id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut by_post: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            by_post
                .entry(row.try_get("post_id")?)
                .or_default()
                .push(row.try_get("fish_type_id")?);
        }
        for post in posts.iter_mut() {
            post.fish_type_ids = by_post.remove(&post.id.as_i64()).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresTx {
    async fn create_outbox(&mut self, record: &OutboxRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox (id, event_type, event_data, channel, aggregate_id, aggregate_type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.event_type)
        .bind(&record.event_data)
        .bind(&record.channel)
        .bind(&record.aggregate_id)
        .bind(&record.aggregate_type)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, "outbox", record.id))?;

        StoreError::check_rows(1, result.rows_affected())
    }

    async fn list_outbox_by_aggregate(
        &mut self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, event_data, channel, aggregate_id, aggregate_type, created_at, updated_at
            FROM outbox
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_outbox).collect()
    }
}

#[async_trait]
impl SagaInstanceStore for PostgresTx {
    async fn create_saga_instance(&mut self, instance: &SagaInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO saga_instance (id, saga_type, saga_data, current_state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(instance.id.as_uuid())
        .bind(&instance.saga_type)
        .bind(&instance.saga_data)
        .bind(&instance.current_state)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, "saga_instance", instance.id))?;

        StoreError::check_rows(1, result.rows_affected())
    }

    async fn update_saga_instance(
        &mut self,
        instance: &SagaInstance,
        expected_state: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE saga_instance
            SET saga_data = $1, current_state = $2, updated_at = $3
            WHERE id = $4 AND current_state = $5
            "#,
        )
        .bind(&instance.saga_data)
        .bind(&instance.current_state)
        .bind(instance.updated_at)
        .bind(instance.id.as_uuid())
        .bind(expected_state)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT current_state FROM saga_instance WHERE id = $1")
                    .bind(instance.id.as_uuid())
                    .fetch_optional(&mut *self.tx)
                    .await?;

            return Err(match actual {
                Some(actual) => StoreError::StateConflict {
                    saga_id: instance.id,
                    expected: expected_state.to_string(),
                    actual,
                },
                None => StoreError::not_found("saga_instance", instance.id),
            });
        }

        StoreError::check_rows(1, result.rows_affected())
    }

    async fn get_saga_instance(&mut self, id: SagaId) -> Result<SagaInstance> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, saga_type, saga_data, current_state, created_at, updated_at
            FROM saga_instance
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => row_to_saga_instance(&row),
            None => Err(StoreError::not_found("saga_instance", id)),
        }
    }
}

#[async_trait]
impl PostStore for PostgresTx {
    async fn create_post(&mut self, post: NewPost, now: DateTime<Utc>) -> Result<Post> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO posts (title, content, fishing_spot_type_id, prefecture_id, meeting_place_id,
                               meeting_at, max_apply, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING id
            "#,
        )
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.fishing_spot_type_id)
        .bind(post.prefecture_id)
        .bind(&post.meeting_place_id)
        .bind(post.meeting_at)
        .bind(post.max_apply)
        .bind(post.user_id.as_i64())
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        let post = post.into_post(PostId::new(id), now);
        self.insert_fish_types(post.id, &post.fish_type_ids, now)
            .await?;
        Ok(post)
    }

    async fn get_post(&mut self, id: PostId) -> Result<Post> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = $1"))
                .bind(id.as_i64())
                .fetch_optional(&mut *self.tx)
                .await?;

        let row = row.ok_or_else(|| StoreError::not_found("post", id))?;
        let mut posts = [row_to_post(&row)?];
        self.fill_fish_types(&mut posts).await?;
        let [post] = posts;
        Ok(post)
    }

    async fn update_post(&mut self, post: &Post) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET title = $1, content = $2, fishing_spot_type_id = $3, prefecture_id = $4,
                meeting_place_id = $5, meeting_at = $6, max_apply = $7, updated_at = $8
            WHERE id = $9
            "#,
        )
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.fishing_spot_type_id)
        .bind(post.prefecture_id)
        .bind(&post.meeting_place_id)
        .bind(post.meeting_at)
        .bind(post.max_apply)
        .bind(post.updated_at)
        .bind(post.id.as_i64())
        .execute(&mut *self.tx)
        .await?;
        check_keyed_write(result.rows_affected(), "post", post.id)?;

        sqlx::query("DELETE FROM posts_fish_types WHERE post_id = $1")
            .bind(post.id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        self.insert_fish_types(post.id, &post.fish_type_ids, post.updated_at)
            .await
    }

    async fn delete_post(&mut self, id: PostId) -> Result<()> {
        // Fish types and applications go with the post (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        check_keyed_write(result.rows_affected(), "post", id)
    }

    async fn list_posts(
        &mut self,
        filter: &PostFilter,
        limit: i64,
        cursor: Option<PostId>,
    ) -> Result<Vec<Post>> {
        // Id order needs only the cursor ID, so a deleted cursor row still pages.
        let cursor = match (cursor, filter.sort_by) {
            (None, _) => None,
            (Some(id), SortBy::Id) => Some((None, id)),
            (Some(id), SortBy::MeetingAt) => Some((Some(self.get_post(id).await?.meeting_at), id)),
        };
        let mut wanted_fish = filter.fish_type_ids.clone();
        wanted_fish.sort_unstable();
        wanted_fish.dedup();

        let mut sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if filter.user_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND p.user_id = ${param_count}"));
        }
        if filter.prefecture_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND p.prefecture_id = ${param_count}"));
        }
        if filter.fishing_spot_type_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND p.fishing_spot_type_id = ${param_count}"));
        }
        if !wanted_fish.is_empty() {
            sql.push_str(&format!(
                " AND (SELECT COUNT(DISTINCT f.fish_type_id) FROM posts_fish_types f \
                 WHERE f.post_id = p.id AND f.fish_type_id = ANY(${})) = ${}",
                param_count + 1,
                param_count + 2
            ));
            param_count += 2;
        }
        let meeting_range = filter.meeting_at_from.zip(filter.meeting_at_to);
        if meeting_range.is_some() {
            sql.push_str(&format!(
                " AND p.meeting_at BETWEEN ${} AND ${}",
                param_count + 1,
                param_count + 2
            ));
            param_count += 2;
        }
        if filter.can_apply {
            sql.push_str(
                " AND (SELECT COUNT(*) FROM apply_posts a WHERE a.post_id = p.id) < p.max_apply",
            );
        }

        let op = match filter.order_by {
            OrderBy::Asc => ">",
            OrderBy::Desc => "<",
        };
        let dir = match filter.order_by {
            OrderBy::Asc => "ASC",
            OrderBy::Desc => "DESC",
        };
        if let Some((meeting_at, _)) = cursor {
            match meeting_at {
                None => {
                    param_count += 1;
                    sql.push_str(&format!(" AND p.id {op} ${param_count}"));
                }
                // meeting_at is not unique, so ties are broken by id
                Some(_) => {
                    sql.push_str(&format!(
                        " AND (p.meeting_at, p.id) {op} (${}, ${})",
                        param_count + 1,
                        param_count + 2
                    ));
                    param_count += 2;
                }
            }
        }
        match filter.sort_by {
            SortBy::Id => sql.push_str(&format!(" ORDER BY p.id {dir}")),
            SortBy::MeetingAt => {
                sql.push_str(&format!(" ORDER BY p.meeting_at {dir}, p.id {dir}"))
            }
        }
        param_count += 1;
        sql.push_str(&format!(" LIMIT ${param_count}"));

        // Bind in the same order the placeholders were emitted
        let mut query = sqlx::query(&sql);
        if let Some(user_id) = filter.user_id {
            query = query.bind(user_id.as_i64());
        }
        if let Some(prefecture_id) = filter.prefecture_id {
            query = query.bind(prefecture_id);
        }
        if let Some(spot) = filter.fishing_spot_type_id {
            query = query.bind(spot);
        }
        if !wanted_fish.is_empty() {
            query = query
                .bind(wanted_fish.clone())
                .bind(wanted_fish.len() as i64);
        }
        if let Some((from, to)) = meeting_range {
            query = query.bind(from).bind(to);
        }
        if let Some((meeting_at, id)) = cursor {
            if let Some(meeting_at) = meeting_at {
                query = query.bind(meeting_at);
            }
            query = query.bind(id.as_i64());
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&mut *self.tx).await?;
        let mut posts = rows.iter().map(row_to_post).collect::<Result<Vec<_>>>()?;
        self.fill_fish_types(&mut posts).await?;
        Ok(posts)
    }
}

const APPLY_POST_COLUMNS: &str = "id, post_id, user_id, created_at, updated_at";

#[async_trait]
impl ApplyPostStore for PostgresTx {
    async fn create_apply_post(
        &mut self,
        apply_post: NewApplyPost,
        now: DateTime<Utc>,
    ) -> Result<ApplyPost> {
        let row = sqlx::query(&format!(
            "INSERT INTO apply_posts (post_id, user_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $3) RETURNING {APPLY_POST_COLUMNS}"
        ))
        .bind(apply_post.post_id.as_i64())
        .bind(apply_post.user_id.as_i64())
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            map_insert_error(
                e,
                "apply_post",
                format!("{}/{}", apply_post.post_id, apply_post.user_id),
            )
        })?;

        row_to_apply_post(&row)
    }

    async fn get_apply_post(&mut self, id: ApplyPostId) -> Result<ApplyPost> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {APPLY_POST_COLUMNS} FROM apply_posts WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => row_to_apply_post(&row),
            None => Err(StoreError::not_found("apply_post", id)),
        }
    }

    async fn delete_apply_post(&mut self, id: ApplyPostId) -> Result<()> {
        let result = sqlx::query("DELETE FROM apply_posts WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        check_keyed_write(result.rows_affected(), "apply_post", id)
    }

    async fn count_apply_posts_by_post_id(&mut self, post_id: PostId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM apply_posts WHERE post_id = $1")
            .bind(post_id.as_i64())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn list_apply_posts_by_user_id(&mut self, user_id: UserId) -> Result<Vec<ApplyPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {APPLY_POST_COLUMNS} FROM apply_posts WHERE user_id = $1 ORDER BY id ASC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_apply_post).collect()
    }

    async fn list_apply_posts_by_post_id(&mut self, post_id: PostId) -> Result<Vec<ApplyPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {APPLY_POST_COLUMNS} FROM apply_posts WHERE post_id = $1 ORDER BY id ASC"
        ))
        .bind(post_id.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_apply_post).collect()
    }

    async fn batch_get_apply_posts_by_post_ids(
        &mut self,
        post_ids: &[PostId],
    ) -> Result<Vec<ApplyPost>> {
        let ids: Vec<i64> = post_ids.iter().map(PostId::as_i64).collect();
        let rows = sqlx::query(&format!(
            "SELECT {APPLY_POST_COLUMNS} FROM apply_posts WHERE post_id = ANY($1) ORDER BY id ASC"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_apply_post).collect()
    }
}
