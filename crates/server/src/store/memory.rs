use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use biportal_schedule::{DispatchState, Subscription};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DeliveryLog, NewDeliveryLog, Recipient, StoreError, StoredCredentials, SubscriptionDetail,
    SubscriptionInput, SubscriptionStore,
};

#[derive(Default)]
struct Inner {
    companies: HashMap<Uuid, String>,
    /// Insertion order doubles as creation order.
    subscriptions: Vec<SubscriptionDetail>,
    logs: Vec<DeliveryLog>,
    credentials: HashMap<Uuid, StoredCredentials>,
}

/// Process-local store for router and pipeline tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

fn recipients_from(emails: &[String]) -> Vec<Recipient> {
    let mut out: Vec<Recipient> = Vec::with_capacity(emails.len());
    for email in emails {
        if !out.iter().any(|r| &r.email == email) {
            out.push(Recipient {
                email: email.clone(),
                is_active: true,
            });
        }
    }
    out
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a company so subscriptions and credentials can reference it.
    pub fn with_company(mut self, id: Uuid, name: impl Into<String>) -> Self {
        self.inner.get_mut().companies.insert(id, name.into());
        self
    }

    /// Make `list_active` fail, as an unreachable database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    /// Insert a subscription exactly as given, bookkeeping included.
    pub async fn insert(&self, subscription: Subscription, recipients: &[&str]) {
        let now = Utc::now();
        let emails: Vec<String> = recipients.iter().map(|r| r.to_string()).collect();
        self.inner.write().await.subscriptions.push(SubscriptionDetail {
            subscription,
            recipients: recipients_from(&emails),
            created_at: now,
            updated_at: now,
        });
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Subscription>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .iter()
            .filter(|d| d.subscription.state.is_active)
            .map(|d| d.subscription.clone())
            .collect())
    }

    async fn list(&self, company_id: Option<Uuid>) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .iter()
            .rev()
            .filter(|d| company_id.map_or(true, |c| d.subscription.company_id == c))
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SubscriptionDetail>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .iter()
            .find(|d| d.subscription.id == id)
            .cloned())
    }

    async fn create(&self, input: &SubscriptionInput) -> Result<SubscriptionDetail, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.companies.contains_key(&input.company_id) {
            return Err(StoreError::UnknownCompany(input.company_id));
        }
        let now = Utc::now();
        let detail = SubscriptionDetail {
            subscription: Subscription {
                id: Uuid::new_v4(),
                company_id: input.company_id,
                name: input.name.clone(),
                spec: input.spec.clone(),
                state: DispatchState {
                    last_fired_at: None,
                    is_active: input.is_active,
                },
                report: input.report.clone(),
            },
            recipients: recipients_from(&input.recipients),
            created_at: now,
            updated_at: now,
        };
        inner.subscriptions.push(detail.clone());
        Ok(detail)
    }

    async fn replace(
        &self,
        id: Uuid,
        input: &SubscriptionInput,
    ) -> Result<Option<SubscriptionDetail>, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.companies.contains_key(&input.company_id) {
            return Err(StoreError::UnknownCompany(input.company_id));
        }
        let Some(detail) = inner.subscriptions.iter_mut().find(|d| d.subscription.id == id) else {
            return Ok(None);
        };
        let sub = &mut detail.subscription;
        sub.company_id = input.company_id;
        sub.name = input.name.clone();
        sub.spec = input.spec.clone();
        sub.report = input.report.clone();
        sub.state.is_active = input.is_active;
        detail.recipients = recipients_from(&input.recipients);
        detail.updated_at = Utc::now();
        Ok(Some(detail.clone()))
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionDetail>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .subscriptions
            .iter_mut()
            .find(|d| d.subscription.id == id)
            .map(|detail| {
                detail.subscription.state.is_active = active;
                detail.updated_at = Utc::now();
                detail.clone()
            }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|d| d.subscription.id != id);
        let removed = inner.subscriptions.len() != before;
        if removed {
            inner.logs.retain(|l| l.subscription_id != id);
        }
        Ok(removed)
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(detail) = inner.subscriptions.iter_mut().find(|d| d.subscription.id == id) {
            detail.subscription.state.last_fired_at = Some(at);
        }
        Ok(())
    }

    async fn record_delivery(&self, log: &NewDeliveryLog) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.logs.push(DeliveryLog {
            id: Uuid::new_v4(),
            subscription_id: log.subscription_id,
            status: log.status,
            error_message: log.error_message.clone(),
            recipient_count: log.recipient_count,
            file_size_bytes: log.file_size_bytes,
            duration_ms: log.duration_ms,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delivery_logs(&self, id: Uuid, limit: u32) -> Result<Vec<DeliveryLog>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .logs
            .iter()
            .rev()
            .filter(|l| l.subscription_id == id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn company_name(&self, company_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.companies.get(&company_id).cloned())
    }

    async fn save_credentials(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.companies.contains_key(&credentials.company_id) {
            return Err(StoreError::UnknownCompany(credentials.company_id));
        }
        inner
            .credentials
            .insert(credentials.company_id, credentials.clone());
        Ok(())
    }

    async fn credentials(&self, company_id: Uuid) -> Result<Option<StoredCredentials>, StoreError> {
        Ok(self.inner.read().await.credentials.get(&company_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeliveryStatus;
    use biportal_schedule::{ReportTarget, ScheduleSpec, TimeOfDay};

    fn input(company_id: Uuid) -> SubscriptionInput {
        SubscriptionInput {
            company_id,
            name: "Daily KPIs".into(),
            spec: ScheduleSpec::daily(TimeOfDay::new(8, 0).unwrap()),
            report: ReportTarget {
                workspace_id: "ws".into(),
                report_id: "rpt".into(),
                export_format: "PDF".into(),
            },
            recipients: vec!["a@example.com".into(), "a@example.com".into(), "b@example.com".into()],
            is_active: true,
        }
    }

    #[tokio::test]
    async fn create_requires_known_company() {
        let store = MemoryStore::new();
        let err = store.create(&input(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownCompany(_)));
    }

    #[tokio::test]
    async fn create_dedups_recipients_and_lists_active_only() {
        let company = Uuid::new_v4();
        let store = MemoryStore::new().with_company(company, "Acme");
        let first = store.create(&input(company)).await.unwrap();
        assert_eq!(first.active_recipients(), vec!["a@example.com", "b@example.com"]);

        let second = store.create(&input(company)).await.unwrap();
        store.set_active(second.subscription.id, false).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.subscription.id);
        assert_eq!(store.list(Some(company)).await.unwrap().len(), 2);
        assert!(store.list(Some(Uuid::new_v4())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_keeps_bookkeeping() {
        let company = Uuid::new_v4();
        let store = MemoryStore::new().with_company(company, "Acme");
        let created = store.create(&input(company)).await.unwrap();
        let id = created.subscription.id;
        let sent_at = Utc::now();
        store.mark_sent(id, sent_at).await.unwrap();

        let mut next = input(company);
        next.spec = ScheduleSpec::every_hours(4);
        next.recipients = vec!["c@example.com".into()];
        let replaced = store.replace(id, &next).await.unwrap().unwrap();

        assert_eq!(replaced.subscription.spec, ScheduleSpec::every_hours(4));
        assert_eq!(replaced.subscription.state.last_fired_at, Some(sent_at));
        assert_eq!(replaced.active_recipients(), vec!["c@example.com"]);
        assert!(store.replace(Uuid::new_v4(), &next).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_logs() {
        let company = Uuid::new_v4();
        let store = MemoryStore::new().with_company(company, "Acme");
        let id = store.create(&input(company)).await.unwrap().subscription.id;
        store
            .record_delivery(&NewDeliveryLog {
                subscription_id: id,
                status: DeliveryStatus::Success,
                error_message: None,
                recipient_count: 2,
                file_size_bytes: Some(10),
                duration_ms: 5,
            })
            .await
            .unwrap();
        assert_eq!(store.delivery_logs(id, 100).await.unwrap().len(), 1);

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.delivery_logs(id, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_active_listing() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.list_active().await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
