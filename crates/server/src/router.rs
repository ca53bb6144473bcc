//! HTTP router construction.
//!
//! Assembles all Axum routes, middleware, and OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api;
use crate::state::AppState;

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS_ORIGIN, allowing any origin");
            CorsLayer::permissive()
        }
    }
}

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route(
            "/api/subscriptions/process",
            post(api::process::process_subscriptions),
        )
        .route(
            "/api/subscriptions",
            get(api::subscriptions::subscriptions_list).post(api::subscriptions::subscriptions_create),
        )
        .route(
            "/api/subscriptions/{id}",
            get(api::subscriptions::subscriptions_get)
                .put(api::subscriptions::subscriptions_replace)
                .delete(api::subscriptions::subscriptions_delete),
        )
        .route(
            "/api/subscriptions/{id}/active",
            patch(api::subscriptions::subscriptions_set_active),
        )
        .route(
            "/api/subscriptions/{id}/send",
            post(api::subscriptions::subscriptions_send),
        )
        .route(
            "/api/subscriptions/{id}/logs",
            get(api::subscriptions::subscriptions_logs),
        )
        .route(
            "/api/companies/{company_id}/powerbi-credentials",
            get(api::credentials::credentials_get).put(api::credentials::credentials_put),
        )
        .layer(cors_layer(cors_origin))
        .with_state(state)
        .merge(Scalar::with_url("/docs", api::doc::ApiDoc::openapi()))
}
