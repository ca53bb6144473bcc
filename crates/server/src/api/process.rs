//! Dispatch trigger: runs one matching cycle over the active subscriptions.
//!
//! Meant to be hit by an external scheduler every few minutes. Per-item
//! failures are reported in `results` with a 200; only a cycle that could not
//! read the subscription set answers 500.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use biportal_schedule::process_due_subscriptions;
use chrono::Utc;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::state::AppState;
use crate::store::StoreSource;

fn failure(status: StatusCode, error: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
}

fn token_matches(presented: Option<&str>, expected: &str) -> bool {
    presented.is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
}

/// POST /api/subscriptions/process -- run one dispatch cycle now.
#[utoipa::path(
    post,
    path = "/api/subscriptions/process",
    tag = "Dispatch",
    responses(
        (status = 200, description = "Cycle ran; per-subscription outcomes in `results`", body = Object),
        (status = 401, description = "Trigger token required", body = Object),
        (status = 500, description = "Active subscriptions could not be loaded", body = Object)
    )
)]
pub async fn process_subscriptions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if let Some(expected) = state.trigger_token.as_deref() {
        if !token_matches(bearer_token(&headers), expected) {
            warn!("dispatch trigger rejected: bad or missing bearer token");
            return failure(StatusCode::UNAUTHORIZED, "missing or invalid bearer token");
        }
    }

    let Some(store) = state.store.clone() else {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "subscription store is not configured",
        );
    };
    let Some(exporter) = state.exporter.clone() else {
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "report delivery is not configured",
        );
    };

    match process_due_subscriptions(&StoreSource(store), exporter.as_ref(), Utc::now()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "processed": report.matched,
                "evaluated": report.evaluated,
                "results": report.results,
            })),
        ),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
