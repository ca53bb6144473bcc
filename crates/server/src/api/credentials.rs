//! Per-company Power BI service principal, secret encrypted at rest.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::credentials::encrypt_secret;
use crate::state::AppState;
use crate::store::StoredCredentials;

use super::common::{bad_request, internal_error, not_found, require_store, store_error, ApiResult};
use super::ErrorResponse;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CredentialsInput {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// API-facing view; the secret is never returned.
#[derive(Debug, Serialize)]
pub struct CredentialsSafe {
    pub company_id: Uuid,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: &'static str,
    pub updated_at: DateTime<Utc>,
}

impl From<StoredCredentials> for CredentialsSafe {
    fn from(stored: StoredCredentials) -> Self {
        Self {
            company_id: stored.company_id,
            tenant_id: stored.tenant_id,
            client_id: stored.client_id,
            client_secret: "********",
            updated_at: stored.updated_at,
        }
    }
}

/// PUT /api/companies/{company_id}/powerbi-credentials -- store or replace.
#[utoipa::path(
    put,
    path = "/api/companies/{company_id}/powerbi-credentials",
    tag = "Power BI Credentials",
    params(("company_id" = String, Path, description = "Company ID")),
    request_body = CredentialsInput,
    responses(
        (status = 200, description = "Credentials stored (secret masked)", body = Object),
        (status = 400, description = "Missing fields or unknown company", body = ErrorResponse)
    )
)]
pub async fn credentials_put(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
    Json(input): Json<CredentialsInput>,
) -> ApiResult<Json<CredentialsSafe>> {
    let store = require_store(&state)?;
    let tenant_id = input.tenant_id.trim();
    let client_id = input.client_id.trim();
    if tenant_id.is_empty() || client_id.is_empty() || input.client_secret.is_empty() {
        return Err(bad_request("tenant_id, client_id and client_secret are required"));
    }

    let stored = StoredCredentials {
        company_id,
        tenant_id: tenant_id.to_string(),
        client_id: client_id.to_string(),
        client_secret_encrypted: encrypt_secret(&state.credential_key, &input.client_secret)
            .map_err(internal_error)?,
        updated_at: Utc::now(),
    };
    store.save_credentials(&stored).await.map_err(store_error)?;
    info!(%company_id, "Power BI credentials stored");
    Ok(Json(stored.into()))
}

/// GET /api/companies/{company_id}/powerbi-credentials -- masked view.
#[utoipa::path(
    get,
    path = "/api/companies/{company_id}/powerbi-credentials",
    tag = "Power BI Credentials",
    params(("company_id" = String, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Credentials (secret masked)", body = Object),
        (status = 404, description = "No credentials stored", body = ErrorResponse)
    )
)]
pub async fn credentials_get(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> ApiResult<Json<CredentialsSafe>> {
    let store = require_store(&state)?;
    store
        .credentials(company_id)
        .await
        .map_err(store_error)?
        .map(|c| Json(c.into()))
        .ok_or_else(|| not_found("Power BI credentials for company", company_id))
}
