//! HTTP API server with observability for the post service.
//!
//! Provides REST endpoints for posts, applications and the CreatePost saga,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{PostService, ServiceConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::SagaCoordinator;
use storage::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/posts",
            post(routes::posts::create::<S>).get(routes::posts::list::<S>),
        )
        .route(
            "/posts/{id}",
            get(routes::posts::get::<S>)
                .put(routes::posts::update::<S>)
                .delete(routes::posts::delete::<S>),
        )
        .route(
            "/posts/{id}/apply-posts",
            post(routes::posts::apply::<S>).get(routes::posts::list_applications::<S>),
        )
        .route("/apply-posts", get(routes::apply_posts::list::<S>))
        .route(
            "/apply-posts/{id}",
            get(routes::apply_posts::get::<S>).delete(routes::apply_posts::delete::<S>),
        )
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/saga-replies", post(routes::sagas::reply::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state, sharing one store between the post
/// service and the saga coordinator.
pub fn create_default_state<S: Store>(store: S, config: ServiceConfig) -> Arc<AppState<S>> {
    Arc::new(AppState {
        post_service: PostService::new(store.clone(), config),
        saga_coordinator: SagaCoordinator::new(store, config),
    })
}
