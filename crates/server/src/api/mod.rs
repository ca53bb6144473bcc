//! HTTP handlers.

pub mod common;
pub mod credentials;
pub mod doc;
pub mod health;
pub mod process;
pub mod subscriptions;

use serde::Serialize;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
