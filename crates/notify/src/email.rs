//! SMTP email notifier via `lettre` with TLS support.
//!
//! Delivers report emails (HTML body plus file attachments) through an SMTP
//! relay. Supports STARTTLS and implicit TLS connections.

use biportal_core::config::SmtpConfig;
use lettre::{
    message::{header::ContentType, Attachment as MailAttachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::traits::{Notification, Notifier, NotifyError};

/// Sends notifications as emails via SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    /// Async SMTP transport for sending emails.
    transport: AsyncSmtpTransport<Tokio1Executor>,
    /// Sender mailbox.
    from: Mailbox,
}

impl EmailNotifier {
    /// Build an `EmailNotifier` from SMTP primitives.
    ///
    /// - `smtp_host`: SMTP server hostname.
    /// - `smtp_port`: port; 465 always uses implicit TLS.
    /// - `tls`: STARTTLS on ports other than 465.
    /// - `from`: sender, e.g. `"reports@example.com"` or `"Reports <reports@example.com>"`.
    /// - `credentials`: optional `(username, password)` pair.
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        tls: bool,
        from: &str,
        credentials: Option<(String, String)>,
    ) -> Result<Self, NotifyError> {
        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let mut builder = if smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(smtp_port)
        } else if tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(smtp_port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host).port(smtp_port)
        };

        if let Some((username, password)) = credentials {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from: from_mailbox,
        })
    }

    /// Build from the `SMTP_*` configuration section.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| NotifyError::Config("SMTP_HOST is not set".to_string()))?;
        let credentials = match (&config.username, &config.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        };
        Self::new(host, config.port, config.tls, &config.from, credentials)
    }

    /// Assemble the MIME message for a notification.
    pub fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let recipients = parse_recipients(&notification.recipients)?;

        let mut message_builder = Message::builder()
            .from(self.from.clone())
            .subject(&notification.subject);
        for recipient in recipients {
            message_builder = message_builder.to(recipient);
        }

        let mut body = MultiPart::mixed().singlepart(SinglePart::html(notification.body.clone()));
        for attachment in &notification.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                NotifyError::Config(format!(
                    "invalid content type '{}': {e}",
                    attachment.content_type
                ))
            })?;
            body = body.singlepart(
                MailAttachment::new(attachment.file_name.clone())
                    .body(attachment.bytes.clone(), content_type),
            );
        }

        message_builder
            .multipart(body)
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

/// Parse every address, failing on the first invalid one. At least one is required.
fn parse_recipients(addresses: &[String]) -> Result<Vec<Mailbox>, NotifyError> {
    if addresses.is_empty() {
        return Err(NotifyError::Config(
            "at least one recipient is required".to_string(),
        ));
    }
    addresses
        .iter()
        .map(|addr| {
            addr.trim()
                .parse::<Mailbox>()
                .map_err(|e| NotifyError::InvalidRecipient {
                    address: addr.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    /// Send one email addressed to all recipients of the notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.build_message(notification)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::info!(
            channel = "email",
            subject = %notification.subject,
            recipients = notification.recipients.len(),
            attachments = notification.attachments.len(),
            "report email delivered"
        );

        Ok(())
    }

    /// Returns `"email"`.
    fn channel_name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Attachment;

    fn notifier() -> EmailNotifier {
        EmailNotifier::new("smtp.example.com", 587, true, "Reports <reports@example.com>", None)
            .unwrap()
    }

    fn notification(recipients: &[&str]) -> Notification {
        Notification {
            subject: "Weekly sales".to_string(),
            body: "<p>Attached.</p>".to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            attachments: vec![Attachment {
                file_name: "Sales.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: b"%PDF-1.7".to_vec(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn new_rejects_invalid_from_address() {
        let err = EmailNotifier::new("smtp.example.com", 587, true, "bad-address", None)
            .unwrap_err()
            .to_string();
        assert!(err.contains("Configuration error"), "got: {err}");
    }

    #[test]
    fn implicit_tls_and_plain_ports_build() {
        assert!(EmailNotifier::new("smtp.example.com", 465, true, "a@example.com", None).is_ok());
        assert!(EmailNotifier::new(
            "smtp.example.com",
            25,
            false,
            "a@example.com",
            Some(("user".into(), "pass".into()))
        )
        .is_ok());
    }

    #[test]
    fn from_config_requires_host() {
        let config = SmtpConfig {
            host: None,
            port: 587,
            tls: true,
            username: None,
            password: None,
            from: "reports@example.com".to_string(),
        };
        let err = EmailNotifier::from_config(&config).unwrap_err().to_string();
        assert!(err.contains("SMTP_HOST"), "got: {err}");
    }

    #[test]
    fn message_carries_all_recipients_and_attachment() {
        let message = notifier()
            .build_message(&notification(&["ana@example.com", "Bo <bo@example.com>"]))
            .unwrap();
        let to: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(to, vec!["ana@example.com", "bo@example.com"]);

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Sales.pdf"));
        assert!(raw.contains("application/pdf"));
    }

    #[test]
    fn message_requires_recipients() {
        let err = notifier().build_message(&notification(&[])).unwrap_err().to_string();
        assert!(err.contains("at least one recipient"), "got: {err}");
    }

    #[test]
    fn invalid_recipient_is_named() {
        let err = notifier()
            .build_message(&notification(&["ok@example.com", "not-an-email"]))
            .unwrap_err();
        match err {
            NotifyError::InvalidRecipient { address, .. } => assert_eq!(address, "not-an-email"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn channel_name_is_email() {
        assert_eq!(notifier().channel_name(), "email");
    }
}
