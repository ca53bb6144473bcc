//! Notifier trait definition and shared error types.

/// Errors that can occur during report delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid recipient '{address}': {reason}")]
    InvalidRecipient { address: String, reason: String },
}

/// A file attached to a notification.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    /// Rendered subject line.
    pub subject: String,
    /// Rendered HTML body.
    pub body: String,
    /// Destination addresses.
    pub recipients: Vec<String>,
    pub attachments: Vec<Attachment>,
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g. "email").
    fn channel_name(&self) -> &str;
}
