use std::sync::Arc;

use biportal_schedule::ReportExporter;

use crate::store::SubscriptionStore;

pub struct AppState {
    /// `None` when PostgreSQL is not configured.
    pub store: Option<Arc<dyn SubscriptionStore>>,
    /// `None` until both a store and SMTP are configured.
    pub exporter: Option<Arc<dyn ReportExporter>>,
    /// Seals Power BI client secrets at rest.
    pub credential_key: [u8; 32],
    /// Bearer token required by the dispatch trigger, if set.
    pub trigger_token: Option<String>,
}
