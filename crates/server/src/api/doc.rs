//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers and `ToSchema`-derived
//! types into a single OpenAPI 3.1 spec, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "biportal API",
        version = "0.1.0",
        description = "Recurring Power BI report subscriptions: schedule, export and email delivery.",
    ),
    tags(
        (name = "Health", description = "Server readiness"),
        (name = "Dispatch", description = "Scheduler trigger that runs one matching cycle"),
        (name = "Subscriptions", description = "Report subscription CRUD, manual send and delivery history"),
        (name = "Power BI Credentials", description = "Per-company service principal with encrypted secret"),
    ),
    paths(
        crate::api::health::health,
        crate::api::process::process_subscriptions,
        crate::api::subscriptions::subscriptions_list,
        crate::api::subscriptions::subscriptions_create,
        crate::api::subscriptions::subscriptions_get,
        crate::api::subscriptions::subscriptions_replace,
        crate::api::subscriptions::subscriptions_set_active,
        crate::api::subscriptions::subscriptions_delete,
        crate::api::subscriptions::subscriptions_send,
        crate::api::subscriptions::subscriptions_logs,
        crate::api::credentials::credentials_put,
        crate::api::credentials::credentials_get,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::health::HealthResponse,
        crate::api::subscriptions::SetActiveRequest,
        crate::api::credentials::CredentialsInput,
    ))
)]
pub struct ApiDoc;
