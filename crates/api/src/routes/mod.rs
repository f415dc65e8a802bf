//! HTTP handlers.

pub mod apply_posts;
pub mod health;
pub mod metrics;
pub mod posts;
pub mod sagas;

use common::UserId;
use domain::PostService;
use saga::SagaCoordinator;
use serde::Deserialize;
use storage::Store;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub post_service: PostService<S>,
    pub saga_coordinator: SagaCoordinator<S>,
}

/// Identifies the user on whose behalf a mutation runs.
///
/// Authentication is handled upstream; the caller passes the user ID through.
#[derive(Debug, Deserialize)]
pub struct ActingUser {
    pub user_id: UserId,
}

/// Parses a comma-separated list of IDs such as `"1,2,3"`.
pub(crate) fn parse_id_list<T>(raw: Option<&str>) -> Result<Vec<T>, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| ApiError::BadRequest(format!("invalid ID list {raw:?}: {e}")))
        })
        .collect()
}
