//! Report subscription aggregate and its dispatch bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matcher::is_due;
use crate::spec::ScheduleSpec;

/// Mutable per-subscription bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchState {
    /// When the last dispatch attempt was made (`last_sent_at` in the store).
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Inactive subscriptions are never matched.
    pub is_active: bool,
}

impl DispatchState {
    pub fn active() -> Self {
        Self {
            last_fired_at: None,
            is_active: true,
        }
    }

    pub fn fired_at(at: DateTime<Utc>) -> Self {
        Self {
            last_fired_at: Some(at),
            is_active: true,
        }
    }
}

/// The Power BI report a subscription renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTarget {
    /// Power BI workspace (group) id.
    pub workspace_id: String,
    pub report_id: String,
    /// Export file format, e.g. `PDF`.
    pub export_format: String,
}

/// A stored recurring report delivery owned by a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub spec: ScheduleSpec,
    pub state: DispatchState,
    pub report: ReportTarget,
}

impl Subscription {
    /// Whether this subscription should fire at `now`.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        is_due(&self.spec, &self.state, now)
    }
}
