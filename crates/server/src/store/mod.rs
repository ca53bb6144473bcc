//! Subscription persistence.
//!
//! [`SubscriptionStore`] is the seam between the HTTP layer, the delivery
//! pipeline and the database. [`PgSubscriptionStore`] is the only production
//! implementation; tests run against an in-memory one.

#[cfg(test)]
mod memory;
mod pg;

use std::sync::Arc;

use async_trait::async_trait;
use biportal_schedule::{ReportTarget, ScheduleSpec, SourceError, Subscription, SubscriptionSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(test)]
pub use memory::MemoryStore;
pub use pg::PgSubscriptionStore;

/// Errors surfaced by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unknown company: {0}")]
    UnknownCompany(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub is_active: bool,
}

/// A subscription together with its recipient list.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetail {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub recipients: Vec<Recipient>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionDetail {
    pub fn active_recipients(&self) -> Vec<String> {
        self.recipients
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.email.clone())
            .collect()
    }
}

/// Create / full-replace payload. The schedule is expected to be normalized and
/// validated by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInput {
    pub company_id: Uuid,
    pub name: String,
    pub spec: ScheduleSpec,
    pub report: ReportTarget,
    pub recipients: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "success" {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failed
        }
    }
}

/// One row of delivery history.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub recipient_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    pub subscription_id: Uuid,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub recipient_count: u32,
    pub file_size_bytes: Option<u64>,
    pub duration_ms: u64,
}

/// Power BI service principal as stored; the secret stays encrypted.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub company_id: Uuid,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret_encrypted: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every subscription with `is_active = true`, oldest first.
    async fn list_active(&self) -> Result<Vec<Subscription>, StoreError>;

    async fn list(&self, company_id: Option<Uuid>) -> Result<Vec<SubscriptionDetail>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<SubscriptionDetail>, StoreError>;

    async fn create(&self, input: &SubscriptionInput) -> Result<SubscriptionDetail, StoreError>;

    /// Replace spec, report, recipients and flags. Bookkeeping is kept.
    async fn replace(
        &self,
        id: Uuid,
        input: &SubscriptionInput,
    ) -> Result<Option<SubscriptionDetail>, StoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionDetail>, StoreError>;

    /// Hard delete; recipients and delivery logs go with it.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Write `last_sent_at`.
    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn record_delivery(&self, log: &NewDeliveryLog) -> Result<(), StoreError>;

    /// Latest first, at most `limit` rows.
    async fn delivery_logs(&self, id: Uuid, limit: u32) -> Result<Vec<DeliveryLog>, StoreError>;

    async fn company_name(&self, company_id: Uuid) -> Result<Option<String>, StoreError>;

    async fn save_credentials(&self, credentials: &StoredCredentials) -> Result<(), StoreError>;

    async fn credentials(&self, company_id: Uuid) -> Result<Option<StoredCredentials>, StoreError>;
}

/// Adapts a store to the dispatch loop's source seam.
pub struct StoreSource(pub Arc<dyn SubscriptionStore>);

#[async_trait]
impl SubscriptionSource for StoreSource {
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, SourceError> {
        self.0
            .list_active()
            .await
            .map_err(|e| SourceError(e.to_string()))
    }
}
