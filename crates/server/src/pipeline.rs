//! Export-and-deliver pipeline for one subscription.
//!
//! Loads the subscription, stamps `last_sent_at`, renders the report through
//! Power BI, mails it to the recipients and writes a delivery-log row. Every
//! failure after the subscription is found ends up in the log as well as in
//! the returned [`DispatchError`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use biportal_notify::{
    Attachment, Notification, Notifier, ReportContext, ReportEmailContext, SubscriptionContext,
    TemplateRenderer, DEFAULT_BODY_TEMPLATE, DEFAULT_SUBJECT_TEMPLATE,
};
use biportal_powerbi::{ExportFormat, ExportedFile, PowerBiClient, PowerBiCredentials, PowerBiError};
use biportal_schedule::{DispatchError, ReportExporter, ReportTarget};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::decrypt_secret;
use crate::store::{DeliveryStatus, NewDeliveryLog, SubscriptionDetail, SubscriptionStore};

/// Renders a report to a file.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(
        &self,
        credentials: &PowerBiCredentials,
        report: &ReportTarget,
        format: ExportFormat,
    ) -> Result<ExportedFile, PowerBiError>;
}

#[async_trait]
impl ReportRenderer for PowerBiClient {
    async fn render(
        &self,
        credentials: &PowerBiCredentials,
        report: &ReportTarget,
        format: ExportFormat,
    ) -> Result<ExportedFile, PowerBiError> {
        self.export_report(credentials, &report.workspace_id, &report.report_id, format)
            .await
    }
}

/// What a successful delivery produced, for the log row.
struct Delivered {
    file_size: u64,
}

pub struct ReportDeliveryPipeline {
    store: Arc<dyn SubscriptionStore>,
    renderer: Arc<dyn ReportRenderer>,
    notifier: Arc<dyn Notifier>,
    templates: TemplateRenderer,
    key: [u8; 32],
}

impl ReportDeliveryPipeline {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        renderer: Arc<dyn ReportRenderer>,
        notifier: Arc<dyn Notifier>,
        key: [u8; 32],
    ) -> Self {
        Self {
            store,
            renderer,
            notifier,
            templates: TemplateRenderer::new(),
            key,
        }
    }

    async fn load_credentials(&self, company_id: Uuid) -> Result<PowerBiCredentials, DispatchError> {
        let stored = self
            .store
            .credentials(company_id)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?
            .ok_or_else(|| {
                DispatchError::Export(format!(
                    "no Power BI credentials configured for company {company_id}"
                ))
            })?;
        let client_secret = decrypt_secret(&self.key, &stored.client_secret_encrypted)
            .map_err(|e| DispatchError::Export(format!("cannot decrypt Power BI secret: {e}")))?;
        Ok(PowerBiCredentials {
            tenant_id: stored.tenant_id,
            client_id: stored.client_id,
            client_secret,
        })
    }

    async fn deliver(
        &self,
        detail: &SubscriptionDetail,
        recipients: &[String],
    ) -> Result<Delivered, DispatchError> {
        let subscription = &detail.subscription;

        // Stamped before the outcome is known; every attempt, including one
        // with nobody to mail, counts against the repeat guard.
        self.store
            .mark_sent(subscription.id, Utc::now())
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;

        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients(subscription.id));
        }

        let format: ExportFormat = subscription
            .report
            .export_format
            .parse()
            .map_err(DispatchError::Export)?;
        let credentials = self.load_credentials(subscription.company_id).await?;
        let file = self
            .renderer
            .render(&credentials, &subscription.report, format)
            .await
            .map_err(|e| DispatchError::Export(e.to_string()))?;

        let company = match self.store.company_name(subscription.company_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(company_id = %subscription.company_id, error = %e, "company lookup failed");
                None
            }
        };
        let generated = Utc::now();
        let ctx = ReportEmailContext {
            subscription: SubscriptionContext {
                id: subscription.id.to_string(),
                name: subscription.name.clone(),
                frequency: subscription.spec.frequency.to_string(),
            },
            report: ReportContext {
                name: file
                    .file_name
                    .rsplit_once('.')
                    .map_or(file.file_name.as_str(), |(stem, _)| stem)
                    .to_string(),
                file_name: file.file_name.clone(),
                format: format.to_string(),
                size_bytes: file.bytes.len() as u64,
            },
            company,
            generated_at: generated.format("%Y-%m-%d %H:%M").to_string(),
            generated_date: generated.format("%Y-%m-%d").to_string(),
        };

        let subject = self
            .templates
            .render(DEFAULT_SUBJECT_TEMPLATE, &ctx)
            .map_err(|e| DispatchError::Delivery(e.to_string()))?;
        let body = self
            .templates
            .render_html(DEFAULT_BODY_TEMPLATE, &ctx)
            .map_err(|e| DispatchError::Delivery(e.to_string()))?;

        let file_size = file.bytes.len() as u64;
        let notification = Notification {
            subject,
            body,
            recipients: recipients.to_vec(),
            attachments: vec![Attachment {
                file_name: file.file_name,
                content_type: file.content_type,
                bytes: file.bytes,
            }],
        };
        self.notifier
            .send(&notification)
            .await
            .map_err(|e| DispatchError::Delivery(e.to_string()))?;

        Ok(Delivered { file_size })
    }
}

#[async_trait]
impl ReportExporter for ReportDeliveryPipeline {
    async fn export_and_deliver(&self, subscription_id: Uuid) -> Result<(), DispatchError> {
        let started = Instant::now();
        let detail = self
            .store
            .get(subscription_id)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?
            .ok_or(DispatchError::NotFound(subscription_id))?;
        let recipients = detail.active_recipients();

        let result = self.deliver(&detail, &recipients).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let log = match &result {
            Ok(delivered) => NewDeliveryLog {
                subscription_id,
                status: DeliveryStatus::Success,
                error_message: None,
                recipient_count: recipients.len() as u32,
                file_size_bytes: Some(delivered.file_size),
                duration_ms,
            },
            Err(e) => NewDeliveryLog {
                subscription_id,
                status: DeliveryStatus::Failed,
                error_message: Some(e.to_string()),
                recipient_count: recipients.len() as u32,
                file_size_bytes: None,
                duration_ms,
            },
        };
        if let Err(e) = self.store.record_delivery(&log).await {
            warn!(%subscription_id, error = %e, "failed to write delivery log");
        }

        match &result {
            Ok(delivered) => info!(
                %subscription_id,
                recipients = recipients.len(),
                size = delivered.file_size,
                duration_ms,
                "report delivered"
            ),
            Err(e) => warn!(%subscription_id, error = %e, duration_ms, "report delivery failed"),
        }

        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use biportal_notify::NotifyError;
    use biportal_schedule::{
        process_due_subscriptions, DispatchState, ScheduleSpec, Subscription, TimeOfDay,
    };

    use crate::credentials::encrypt_secret;
    use crate::store::{MemoryStore, StoreSource, StoredCredentials};

    const KEY: [u8; 32] = [7u8; 32];

    struct FakeRenderer {
        fail: bool,
        seen_secret: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ReportRenderer for FakeRenderer {
        async fn render(
            &self,
            credentials: &PowerBiCredentials,
            _report: &ReportTarget,
            format: ExportFormat,
        ) -> Result<ExportedFile, PowerBiError> {
            *self.seen_secret.lock().unwrap() = Some(credentials.client_secret.clone());
            if self.fail {
                return Err(PowerBiError::ExportFailed { export_id: "exp-9".into() });
            }
            Ok(ExportedFile {
                file_name: "Sales.pdf".into(),
                content_type: format.content_type().into(),
                bytes: vec![0u8; 2048],
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "recording"
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        renderer: Arc<FakeRenderer>,
        notifier: Arc<RecordingNotifier>,
        pipeline: ReportDeliveryPipeline,
        company: Uuid,
    }

    async fn fixture(render_fails: bool) -> Fixture {
        let company = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_company(company, "Acme"));
        store
            .save_credentials(&StoredCredentials {
                company_id: company,
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret_encrypted: encrypt_secret(&KEY, "s3cret").unwrap(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let renderer = Arc::new(FakeRenderer {
            fail: render_fails,
            seen_secret: Mutex::new(None),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = ReportDeliveryPipeline::new(store.clone(), renderer.clone(), notifier.clone(), KEY);
        Fixture {
            store,
            renderer,
            notifier,
            pipeline,
            company,
        }
    }

    fn subscription(company: Uuid) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            company_id: company,
            name: "Morning sales".into(),
            spec: ScheduleSpec::daily(TimeOfDay::new(8, 0).unwrap()),
            state: DispatchState::active(),
            report: ReportTarget {
                workspace_id: "ws".into(),
                report_id: "rpt".into(),
                export_format: "pdf".into(),
            },
        }
    }

    #[tokio::test]
    async fn delivers_report_and_logs_success() {
        let fx = fixture(false).await;
        let sub = subscription(fx.company);
        fx.store.insert(sub.clone(), &["ana@example.com", "bo@example.com"]).await;

        fx.pipeline.export_and_deliver(sub.id).await.unwrap();

        assert_eq!(fx.renderer.seen_secret.lock().unwrap().as_deref(), Some("s3cret"));
        let sent = fx.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["ana@example.com", "bo@example.com"]);
        assert!(sent[0].subject.starts_with("Morning sales: Sales ("));
        assert!(sent[0].body.contains("for Acme"));
        assert_eq!(sent[0].attachments[0].file_name, "Sales.pdf");

        let logs = fx.store.delivery_logs(sub.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Success);
        assert_eq!(logs[0].recipient_count, 2);
        assert_eq!(logs[0].file_size_bytes, Some(2048));

        let stored = fx.store.get(sub.id).await.unwrap().unwrap();
        assert!(stored.subscription.state.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn export_failure_is_logged_and_still_stamps_last_sent() {
        let fx = fixture(true).await;
        let sub = subscription(fx.company);
        fx.store.insert(sub.clone(), &["ana@example.com"]).await;

        let err = fx.pipeline.export_and_deliver(sub.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::Export(_)), "got {err:?}");
        assert!(fx.notifier.sent.lock().unwrap().is_empty());

        let logs = fx.store.delivery_logs(sub.id, 10).await.unwrap();
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert!(logs[0].error_message.as_deref().unwrap_or("").contains("exp-9"));

        let stored = fx.store.get(sub.id).await.unwrap().unwrap();
        assert!(stored.subscription.state.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn no_recipients_still_stamps_last_sent() {
        let fx = fixture(false).await;
        let sub = subscription(fx.company);
        fx.store.insert(sub.clone(), &[]).await;

        let err = fx.pipeline.export_and_deliver(sub.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoRecipients(id) if id == sub.id));

        let stored = fx.store.get(sub.id).await.unwrap().unwrap();
        assert!(stored.subscription.state.last_fired_at.is_some());
        assert_eq!(fx.store.delivery_logs(sub.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recipientless_interval_subscription_is_dispatched_once() {
        let fx = fixture(false).await;
        let mut sub = subscription(fx.company);
        sub.spec = ScheduleSpec::every_hours(6);
        fx.store.insert(sub.clone(), &[]).await;

        let source = StoreSource(fx.store.clone());
        let start = Utc::now();
        for step in 0..3 {
            let now = start + chrono::Duration::minutes(5 * step);
            let report = process_due_subscriptions(&source, &fx.pipeline, now).await.unwrap();
            let expected = if step == 0 { 1 } else { 0 };
            assert_eq!(report.matched, expected, "cycle {step}");
        }

        let logs = fx.store.delivery_logs(sub.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn missing_subscription_is_not_found() {
        let fx = fixture(false).await;
        let id = Uuid::new_v4();
        let err = fx.pipeline.export_and_deliver(id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(x) if x == id));
    }

    #[tokio::test]
    async fn missing_credentials_fail_the_export() {
        let fx = fixture(false).await;
        let other_company = Uuid::new_v4();
        let sub = subscription(other_company);
        fx.store.insert(sub.clone(), &["ana@example.com"]).await;

        let err = fx.pipeline.export_and_deliver(sub.id).await.unwrap_err();
        assert!(err.to_string().contains("no Power BI credentials"), "got {err}");
    }
}
