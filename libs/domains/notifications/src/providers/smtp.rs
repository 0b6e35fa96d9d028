//! SMTP channel implementation using lettre.
//!
//! Works against production relays (TLS + credentials) as well as local
//! MailHog/Mailpit instances (plain SMTP).

use super::Channel;
use crate::error::{NotificationError, NotificationResult};
use crate::models::Message;
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_flag, env_optional, env_or_default, env_parse};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Envelope sender address.
    pub from_email: String,
    /// Sender name used when a message names no person.
    pub from_name: String,
    /// SMTP username (optional for dev servers like Mailpit).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers like Mailpit).
    pub password: Option<String>,
    /// Whether to use TLS (false for local dev servers).
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl FromEnv for SmtpConfig {
    /// Defaults target a local Mailpit on port 1025.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025)?,
            from_email: env_or_default("SMTP_FROM_EMAIL", "noreply@localhost"),
            from_name: env_or_default("SMTP_FROM_NAME", "ownCloud"),
            username: env_optional("SMTP_USERNAME"),
            password: env_optional("SMTP_PASSWORD"),
            use_tls: env_flag("SMTP_USE_TLS", false),
        })
    }
}

/// SMTP channel.
pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpChannel {
    /// Create a new SMTP channel.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Build the SMTP transport based on configuration.
    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        };

        let transport = if config.use_tls {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
                .port(config.port);
            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            builder.build()
        } else {
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port);
            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            builder.build()
        };

        Ok(transport)
    }

    /// From header: the person named in `sender` "via" the service, on the
    /// configured address.
    fn from_mailbox(&self, sender: &str) -> NotificationResult<Mailbox> {
        let name = if sender.is_empty() || sender.contains('@') {
            self.config.from_name.clone()
        } else {
            format!("{} via {}", sender, self.config.from_name)
        };
        Ok(Mailbox::new(Some(name), self.config.from_email.parse()?))
    }

    /// Build a lettre message from a rendered [`Message`].
    fn build_message(&self, message: &Message) -> NotificationResult<lettre::Message> {
        if message.recipients.is_empty() {
            return Err(NotificationError::Channel("message has no recipients".into()));
        }

        let mut builder = lettre::Message::builder()
            .from(self.from_mailbox(&message.sender)?)
            .subject(&message.subject);
        for recipient in &message.recipients {
            let to: Mailbox = recipient.parse()?;
            builder = builder.to(to);
        }

        let alternative = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(message.text_body.clone()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(message.html_body.clone()),
            );

        let body = if message.attachments.is_empty() {
            alternative
        } else {
            let mut related = MultiPart::related().multipart(alternative);
            for attachment in &message.attachments {
                let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                    NotificationError::Channel(format!(
                        "Invalid content type '{}': {}",
                        attachment.content_type, e
                    ))
                })?;
                related = related.singlepart(
                    Attachment::new_inline(attachment.content_id.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }
            related
        };

        Ok(builder.multipart(body)?)
    }
}

#[async_trait]
impl Channel for SmtpChannel {
    async fn send(&self, message: &Message) -> NotificationResult<()> {
        debug!(
            recipients = message.recipients.len(),
            subject = %message.subject,
            host = %self.config.host,
            port = %self.config.port,
            attachments = message.attachments.len(),
            "Sending email via SMTP"
        );

        let email = self.build_message(message)?;

        let response = self.transport.send(email).await.map_err(|e| {
            error!(subject = %message.subject, error = %e, "Failed to send email via SMTP");
            NotificationError::from(e)
        })?;

        let message_id = response.message().next().map(|s| s.to_string());
        info!(
            recipients = message.recipients.len(),
            message_id = ?message_id,
            "Email sent successfully via SMTP"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InlineAttachment;

    fn channel() -> SmtpChannel {
        SmtpChannel::new(SmtpConfig::new(
            "localhost".into(),
            1025,
            "noreply@example.org".into(),
            "ownCloud".into(),
        ))
        .unwrap()
    }

    fn message() -> Message {
        Message {
            sender: "Dr. S. Harer".into(),
            recipients: vec!["sharee@owncloud.com".into()],
            subject: "Dr. S. Harer shared 'x' with you".into(),
            text_body: "text".into(),
            html_body: "<p>html</p>".into(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_smtp_config_from_env_defaults() {
        temp_env::with_vars(
            [
                ("SMTP_HOST", None::<&str>),
                ("SMTP_PORT", None),
                ("SMTP_USE_TLS", None),
                ("SMTP_USERNAME", None),
            ],
            || {
                let config = SmtpConfig::from_env().unwrap();
                assert_eq!(config.host, "localhost");
                assert_eq!(config.port, 1025);
                assert!(!config.use_tls);
                assert!(config.username.is_none());
            },
        );
    }

    #[test]
    fn test_smtp_config_from_env_invalid_port() {
        temp_env::with_var("SMTP_PORT", Some("smtp"), || {
            assert!(SmtpConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_smtp_config_with_tls() {
        let config = SmtpConfig::new(
            "smtp.example.org".to_string(),
            587,
            "test@example.org".to_string(),
            "Test".to_string(),
        )
        .with_tls(true)
        .with_credentials("user".to_string(), "pass".to_string());

        assert!(config.use_tls);
        assert_eq!(config.username, Some("user".to_string()));
        assert_eq!(config.password, Some("pass".to_string()));
    }

    #[tokio::test]
    async fn test_build_message_headers() {
        let email = channel().build_message(&message()).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Dr. S. Harer via ownCloud"));
        assert!(raw.contains("<noreply@example.org>"));
        assert!(raw.contains("To: sharee@owncloud.com"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[tokio::test]
    async fn test_build_message_with_inline_attachment() {
        let mut msg = message();
        msg.attachments.push(InlineAttachment {
            content_id: "logo".into(),
            content_type: "image/png".into(),
            data: vec![0x89, 0x50, 0x4e, 0x47],
        });
        let raw = String::from_utf8(channel().build_message(&msg).unwrap().formatted()).unwrap();
        assert!(raw.contains("multipart/related"));
        assert!(raw.contains("Content-ID: <logo>"));
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_input() {
        let mut msg = message();
        msg.recipients.clear();
        assert!(channel().build_message(&msg).is_err());

        msg.recipients.push("not an address".into());
        assert!(channel().build_message(&msg).is_err());
    }
}
