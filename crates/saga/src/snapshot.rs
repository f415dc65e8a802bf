//! Versioned snapshot of the post a saga orchestrates.
//!
//! Stored in `saga_instance.saga_data` as
//! `{"version":1,"post":{...}}`. The post schema is pinned per version so
//! that rows written by older builds stay readable after `Post` evolves.

use chrono::{DateTime, Utc};
use common::{Post, PostId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Version written by this build.
pub const CURRENT_VERSION: u32 = 1;

/// Post fields as of snapshot version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSnapshotV1 {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub fishing_spot_type_id: i64,
    pub prefecture_id: i64,
    pub meeting_place_id: String,
    pub meeting_at: DateTime<Utc>,
    pub max_apply: i64,
    pub user_id: i64,
    pub fish_type_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Post> for PostSnapshotV1 {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.as_i64(),
            title: post.title.clone(),
            content: post.content.clone(),
            fishing_spot_type_id: post.fishing_spot_type_id,
            prefecture_id: post.prefecture_id,
            meeting_place_id: post.meeting_place_id.clone(),
            meeting_at: post.meeting_at,
            max_apply: post.max_apply,
            user_id: post.user_id.as_i64(),
            fish_type_ids: post.fish_type_ids.clone(),
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

impl From<PostSnapshotV1> for Post {
    fn from(s: PostSnapshotV1) -> Self {
        Post {
            id: PostId::new(s.id),
            title: s.title,
            content: s.content,
            fishing_spot_type_id: s.fishing_spot_type_id,
            prefecture_id: s.prefecture_id,
            meeting_place_id: s.meeting_place_id,
            meeting_at: s.meeting_at,
            max_apply: s.max_apply,
            user_id: UserId::new(s.user_id),
            fish_type_ids: s.fish_type_ids,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    post: &'a PostSnapshotV1,
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    post: serde_json::Value,
}

/// Serializes a post at the current snapshot version.
pub fn encode(post: &Post) -> Result<Vec<u8>> {
    let post = PostSnapshotV1::from(post);
    Ok(serde_json::to_vec(&Envelope {
        version: CURRENT_VERSION,
        post: &post,
    })?)
}

/// Restores a post from any supported snapshot version.
pub fn decode(data: &[u8]) -> Result<Post> {
    let raw: RawEnvelope = serde_json::from_slice(data)?;
    match raw.version {
        1 => {
            let post: PostSnapshotV1 = serde_json::from_value(raw.post)?;
            Ok(post.into())
        }
        version => Err(SagaError::UnsupportedSnapshotVersion(version)),
    }
}
