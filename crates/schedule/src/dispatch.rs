//! One dispatch cycle: match active subscriptions and hand each due one to the
//! export pipeline.
//!
//! Exports run strictly one after another in fetch order. A failing export is
//! recorded and the cycle moves on; only failing to read the subscription set
//! fails the cycle itself. The loop never writes dispatch bookkeeping, that is
//! the exporter's job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::subscription::Subscription;

/// Errors an export-and-deliver attempt can report for one subscription.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("subscription not found: {0}")]
    NotFound(Uuid),

    #[error("no active recipients for subscription {0}")]
    NoRecipients(Uuid),

    #[error("report export failed: {0}")]
    Export(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("store error: {0}")]
    Store(String),
}

/// The active subscription set could not be read.
#[derive(Debug, thiserror::Error)]
#[error("failed to load active subscriptions: {0}")]
pub struct SourceError(pub String);

/// A cycle that could not run at all.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Renders a subscription's report and delivers it to its recipients.
#[async_trait::async_trait]
pub trait ReportExporter: Send + Sync {
    async fn export_and_deliver(&self, subscription_id: Uuid) -> Result<(), DispatchError>;
}

/// Reads the current active subscription set.
#[async_trait::async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, SourceError>;
}

/// Outcome of one matched subscription.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing)]
    pub duration_ms: u64,
}

/// Summary of a dispatch cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Subscriptions handed to the matcher.
    pub evaluated: usize,
    /// Subscriptions the matcher found due.
    pub matched: usize,
    /// One entry per matched subscription, in dispatch order.
    pub results: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Match `subscriptions` against `now` and export each due one in order.
pub async fn run_dispatch_cycle(
    subscriptions: &[Subscription],
    now: DateTime<Utc>,
    exporter: &dyn ReportExporter,
) -> DispatchReport {
    let due: Vec<&Subscription> = subscriptions.iter().filter(|s| s.is_due_at(now)).collect();

    let mut report = DispatchReport {
        evaluated: subscriptions.len(),
        matched: due.len(),
        results: Vec::with_capacity(due.len()),
    };

    if due.is_empty() {
        tracing::debug!(evaluated = report.evaluated, "no subscriptions due");
        return report;
    }

    for subscription in due {
        let start = std::time::Instant::now();
        let result = exporter.export_and_deliver(subscription.id).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (success, error) = match result {
            Ok(()) => {
                tracing::info!(
                    subscription_id = %subscription.id,
                    name = %subscription.name,
                    frequency = %subscription.spec.frequency,
                    duration_ms,
                    "Report dispatched"
                );
                (true, None)
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    name = %subscription.name,
                    error = %e,
                    duration_ms,
                    "Report dispatch failed"
                );
                (false, Some(e.to_string()))
            }
        };

        report.results.push(DispatchOutcome {
            id: subscription.id,
            success,
            error,
            duration_ms,
        });
    }

    tracing::info!(
        evaluated = report.evaluated,
        matched = report.matched,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Dispatch cycle complete"
    );

    report
}

/// Read the active set from `source` and run one cycle over it.
pub async fn process_due_subscriptions(
    source: &dyn SubscriptionSource,
    exporter: &dyn ReportExporter,
    now: DateTime<Utc>,
) -> Result<DispatchReport, CycleError> {
    let subscriptions = source.active_subscriptions().await.map_err(|e| {
        tracing::error!(error = %e, "Dispatch cycle aborted");
        e
    })?;
    Ok(run_dispatch_cycle(&subscriptions, now, exporter).await)
}
