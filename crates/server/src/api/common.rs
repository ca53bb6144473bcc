//! Shared helpers and type aliases for API handlers.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::state::AppState;
use crate::store::{StoreError, SubscriptionStore};

use super::ErrorResponse;

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) type ApiResult<T> = Result<T, ApiError>;

fn error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

pub(crate) fn require_store(state: &AppState) -> ApiResult<&Arc<dyn SubscriptionStore>> {
    state
        .store
        .as_ref()
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "PostgreSQL not configured"))
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub(crate) fn not_found(resource: &str, id: Uuid) -> ApiError {
    error(StatusCode::NOT_FOUND, format!("{} not found: {}", resource, id))
}

pub(crate) fn bad_request(msg: impl Into<String>) -> ApiError {
    error(StatusCode::BAD_REQUEST, msg)
}

/// Unknown companies are a client error; everything else is ours.
pub(crate) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::UnknownCompany(id) => bad_request(format!("unknown company: {id}")),
        other => internal_error(other),
    }
}
