//! Subscription CRUD, manual send and delivery history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use biportal_powerbi::ExportFormat;
use biportal_schedule::DispatchError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::state::AppState;
use crate::store::{DeliveryLog, SubscriptionDetail, SubscriptionInput};

use super::common::{
    bad_request, internal_error, not_found, require_store, store_error, ApiError, ApiResult,
};
use super::ErrorResponse;

const LOG_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

// ── Validation ───────────────────────────────────────────────────

/// Normalize and check a create/replace payload the way the subscription
/// form does. The matcher itself never validates.
pub(crate) fn prepare_input(mut input: SubscriptionInput) -> Result<SubscriptionInput, String> {
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err("name must not be empty".into());
    }
    if input.report.workspace_id.trim().is_empty() || input.report.report_id.trim().is_empty() {
        return Err("report.workspace_id and report.report_id are required".into());
    }
    let format: ExportFormat = input.report.export_format.parse()?;
    input.report.export_format = format.as_str().to_string();

    input.spec = input.spec.normalized();
    input.spec.validate().map_err(|e| e.to_string())?;

    let mut recipients: Vec<String> = Vec::with_capacity(input.recipients.len());
    for raw in &input.recipients {
        let email = raw.trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(format!("invalid recipient address: '{raw}'"));
        }
        if !recipients.contains(&email) {
            recipients.push(email);
        }
    }
    if recipients.is_empty() {
        return Err("at least one recipient is required".into());
    }
    input.recipients = recipients;
    Ok(input)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !email.contains(' ')
        }
        None => false,
    }
}

// ── Handlers ─────────────────────────────────────────────────────

/// GET /api/subscriptions -- list subscriptions, optionally for one company.
#[utoipa::path(
    get,
    path = "/api/subscriptions",
    tag = "Subscriptions",
    params(("company_id" = Option<String>, Query, description = "Filter by company")),
    responses(
        (status = 200, description = "Subscriptions, newest first", body = Object),
        (status = 503, description = "PostgreSQL not configured", body = ErrorResponse)
    )
)]
pub async fn subscriptions_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<SubscriptionDetail>>> {
    let store = require_store(&state)?;
    let rows = store.list(params.company_id).await.map_err(store_error)?;
    Ok(Json(rows))
}

/// POST /api/subscriptions -- create a subscription.
#[utoipa::path(
    post,
    path = "/api/subscriptions",
    tag = "Subscriptions",
    request_body = Object,
    responses(
        (status = 201, description = "Subscription created", body = Object),
        (status = 400, description = "Invalid schedule, format or recipients", body = ErrorResponse)
    )
)]
pub async fn subscriptions_create(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SubscriptionInput>,
) -> ApiResult<(StatusCode, Json<SubscriptionDetail>)> {
    let store = require_store(&state)?;
    let input = prepare_input(input).map_err(bad_request)?;
    let created = store.create(&input).await.map_err(store_error)?;
    info!(
        subscription_id = %created.subscription.id,
        frequency = %created.subscription.spec.frequency,
        "subscription created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/subscriptions/{id} -- one subscription with its recipients.
#[utoipa::path(
    get,
    path = "/api/subscriptions/{id}",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscription ID")),
    responses(
        (status = 200, description = "Subscription details", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn subscriptions_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionDetail>> {
    let store = require_store(&state)?;
    store
        .get(id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found("Subscription", id))
}

/// PUT /api/subscriptions/{id} -- replace schedule, report and recipients.
#[utoipa::path(
    put,
    path = "/api/subscriptions/{id}",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscription ID")),
    request_body = Object,
    responses(
        (status = 200, description = "Subscription replaced", body = Object),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn subscriptions_replace(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<SubscriptionInput>,
) -> ApiResult<Json<SubscriptionDetail>> {
    let store = require_store(&state)?;
    let input = prepare_input(input).map_err(bad_request)?;
    store
        .replace(id, &input)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found("Subscription", id))
}

/// PATCH /api/subscriptions/{id}/active -- enable or disable without deleting.
#[utoipa::path(
    patch,
    path = "/api/subscriptions/{id}/active",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscription ID")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Subscription updated", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn subscriptions_set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(input): Json<SetActiveRequest>,
) -> ApiResult<Json<SubscriptionDetail>> {
    let store = require_store(&state)?;
    let updated = store
        .set_active(id, input.is_active)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found("Subscription", id))?;
    info!(subscription_id = %id, is_active = input.is_active, "subscription toggled");
    Ok(Json(updated))
}

/// DELETE /api/subscriptions/{id} -- remove a subscription and its history.
#[utoipa::path(
    delete,
    path = "/api/subscriptions/{id}",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscription ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn subscriptions_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let store = require_store(&state)?;
    if store.delete(id).await.map_err(store_error)? {
        info!(subscription_id = %id, "subscription deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Subscription", id))
    }
}

/// POST /api/subscriptions/{id}/send -- export and deliver now, ignoring the schedule.
#[utoipa::path(
    post,
    path = "/api/subscriptions/{id}/send",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscription ID")),
    responses(
        (status = 200, description = "Report delivered", body = Object),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 502, description = "Export or delivery failed", body = ErrorResponse),
        (status = 503, description = "Report delivery not configured", body = ErrorResponse)
    )
)]
pub async fn subscriptions_send(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let exporter = state.exporter.clone().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "report delivery is not configured".into(),
            }),
        )
    })?;
    exporter
        .export_and_deliver(id)
        .await
        .map_err(|e| dispatch_error(id, e))?;
    Ok(Json(json!({ "success": true, "id": id })))
}

fn dispatch_error(id: Uuid, e: DispatchError) -> ApiError {
    match e {
        DispatchError::NotFound(_) => not_found("Subscription", id),
        DispatchError::NoRecipients(_) => bad_request(e.to_string()),
        DispatchError::Store(_) => internal_error(e),
        DispatchError::Export(_) | DispatchError::Delivery(_) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        ),
    }
}

/// GET /api/subscriptions/{id}/logs -- latest delivery attempts.
#[utoipa::path(
    get,
    path = "/api/subscriptions/{id}/logs",
    tag = "Subscriptions",
    params(("id" = String, Path, description = "Subscription ID")),
    responses(
        (status = 200, description = "Delivery history, newest first", body = Object)
    )
)]
pub async fn subscriptions_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<DeliveryLog>>> {
    let store = require_store(&state)?;
    let logs = store.delivery_logs(id, LOG_LIMIT).await.map_err(store_error)?;
    Ok(Json(logs))
}
