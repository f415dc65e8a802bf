//! Post and apply-post records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ApplyPostId, PostId, UserId};

/// A fishing-trip invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub fishing_spot_type_id: i64,
    pub prefecture_id: i64,
    pub meeting_place_id: String,
    pub meeting_at: DateTime<Utc>,
    /// Maximum number of applications the post accepts.
    pub max_apply: i64,
    /// Owner of the post.
    pub user_id: UserId,
    /// Associated fish types; order is irrelevant.
    pub fish_type_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Applies an update's editable fields, keeping identity and ownership.
    pub fn apply_update(&mut self, update: &PostUpdate, now: DateTime<Utc>) {
        self.title = update.title.clone();
        self.content = update.content.clone();
        self.fishing_spot_type_id = update.fishing_spot_type_id;
        self.prefecture_id = update.prefecture_id;
        self.meeting_place_id = update.meeting_place_id.clone();
        self.meeting_at = update.meeting_at;
        self.max_apply = update.max_apply;
        self.fish_type_ids = update.fish_type_ids.clone();
        self.updated_at = now;
    }
}

/// A post as submitted by its owner, before the store assigns an ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub fishing_spot_type_id: i64,
    pub prefecture_id: i64,
    pub meeting_place_id: String,
    pub meeting_at: DateTime<Utc>,
    pub max_apply: i64,
    pub user_id: UserId,
    pub fish_type_ids: Vec<i64>,
}

impl NewPost {
    /// Materializes the post with the given surrogate key and timestamp.
    pub fn into_post(self, id: PostId, now: DateTime<Utc>) -> Post {
        Post {
            id,
            title: self.title,
            content: self.content,
            fishing_spot_type_id: self.fishing_spot_type_id,
            prefecture_id: self.prefecture_id,
            meeting_place_id: self.meeting_place_id,
            meeting_at: self.meeting_at,
            max_apply: self.max_apply,
            user_id: self.user_id,
            fish_type_ids: self.fish_type_ids,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Editable fields of a post, together with the user requesting the edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdate {
    pub id: PostId,
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

/// A user's application to join a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPost {
    pub id: ApplyPostId,
    pub post_id: PostId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplyPost {
    pub post_id: PostId,
    pub user_id: UserId,
}

/// Column used to order post listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Id,
    MeetingAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    Asc,
    #[default]
    Desc,
}

/// Criteria for listing posts. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFilter {
    pub user_id: Option<UserId>,
    pub prefecture_id: Option<i64>,
    pub fishing_spot_type_id: Option<i64>,
    /// Posts must carry every listed fish type.
    #[serde(default)]
    pub fish_type_ids: Vec<i64>,
    /// Only posts that still have room for applicants.
    #[serde(default)]
    pub can_apply: bool,
    pub meeting_at_from: Option<DateTime<Utc>>,
    pub meeting_at_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub order_by: OrderBy,
}
