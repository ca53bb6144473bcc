//! Report email delivery.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable delivery channels
//! - SMTP email notifier with file attachments
//! - Minijinja template rendering for report email subjects and bodies

pub mod email;
pub mod templating;
pub mod traits;

pub use email::EmailNotifier;
pub use templating::{
    ReportContext, ReportEmailContext, SubscriptionContext, TemplateRenderer,
    DEFAULT_BODY_TEMPLATE, DEFAULT_SUBJECT_TEMPLATE,
};
pub use traits::{Attachment, Notification, Notifier, NotifyError};
