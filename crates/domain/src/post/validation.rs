//! Input checks shared by post creation and update.

use common::{NewPost, PostUpdate};

use super::PostError;

/// Validates a new post and collapses duplicate fish types.
pub fn validate_new_post(mut post: NewPost) -> Result<NewPost, PostError> {
    check_fields(&post.title, &post.content, post.max_apply)?;
    post.fish_type_ids = normalize_fish_types(post.fish_type_ids)?;
    Ok(post)
}

/// Validates an update and collapses duplicate fish types.
pub fn validate_update(mut update: PostUpdate) -> Result<PostUpdate, PostError> {
    check_fields(&update.title, &update.content, update.max_apply)?;
    update.fish_type_ids = normalize_fish_types(update.fish_type_ids)?;
    Ok(update)
}

fn check_fields(title: &str, content: &str, max_apply: i64) -> Result<(), PostError> {
    if title.trim().is_empty() {
        return Err(PostError::EmptyTitle);
    }
    if content.trim().is_empty() {
        return Err(PostError::EmptyContent);
    }
    if max_apply < 1 {
        return Err(PostError::InvalidMaxApply { max_apply });
    }
    Ok(())
}

fn normalize_fish_types(mut ids: Vec<i64>) -> Result<Vec<i64>, PostError> {
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Err(PostError::NoFishTypes);
    }
    Ok(ids)
}
