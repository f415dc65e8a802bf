//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;
use storage::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Saga execution error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => (domain_status(&err), err.to_string()),
            ApiError::Saga(err) => (saga_status(&err), err.to_string()),
        };

        metrics::counter!("api_errors_total", "status" => status.as_u16().to_string()).increment(1);
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Duplicate { .. } | StoreError::StateConflict { .. } => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Post(e) if e.is_validation() => StatusCode::BAD_REQUEST,
        DomainError::Post(e) if e.is_permission_denied() => StatusCode::FORBIDDEN,
        DomainError::Post(e) if e.is_failed_precondition() => StatusCode::CONFLICT,
        DomainError::Post(_) => StatusCode::BAD_REQUEST,
        DomainError::InvalidPageToken(_) => StatusCode::BAD_REQUEST,
        DomainError::Store(e) => store_status(e),
        DomainError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::SagaNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InvalidTransition { .. } => StatusCode::CONFLICT,
        SagaError::InvalidReply(_) => StatusCode::BAD_REQUEST,
        SagaError::Domain(e) => domain_status(e),
        SagaError::Store(e) => store_status(e),
        SagaError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
