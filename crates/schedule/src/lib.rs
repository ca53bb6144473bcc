//! Recurring report scheduling.
//!
//! Provides the schedule descriptor attached to a report subscription, the
//! pure [`is_due`] predicate deciding whether a subscription fires at a given
//! instant, and the dispatch cycle that hands due subscriptions to a
//! [`ReportExporter`].
//!
//! Nothing here owns a timer. A cycle runs when something external calls
//! [`process_due_subscriptions`] (an HTTP trigger, a system cron, a test).

pub mod dispatch;
pub mod matcher;
pub mod spec;
pub mod subscription;


pub use dispatch::{
    process_due_subscriptions, run_dispatch_cycle, CycleError, DispatchError, DispatchOutcome,
    DispatchReport, ReportExporter, SourceError, SubscriptionSource,
};
pub use matcher::{is_due, MATCH_WINDOW_MINUTES, REPEAT_GUARD_MINUTES};
pub use spec::{Frequency, ScheduleSpec, SpecError, TimeOfDay, MAX_DAY_OF_MONTH};
pub use subscription::{DispatchState, ReportTarget, Subscription};
