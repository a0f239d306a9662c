//! Email provider using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChannelProvider, test_request, type_color};
use crate::notification::request::{CHANNEL_EMAIL, NotificationRequest};
use crate::{Error, Result};

/// Email provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Channel id override (default: `email`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// SMTP server host.
    #[serde(default)]
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username.
    #[serde(default)]
    pub smtp_username: Option<String>,
    /// SMTP password.
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// Use TLS (disable for local relays such as Mailpit).
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Sender email address.
    #[serde(default)]
    pub from_address: String,
    /// Sender display name.
    #[serde(default)]
    pub from_name: Option<String>,
    /// Domain appended to recipient ids that are not addresses.
    #[serde(default)]
    pub recipient_domain: Option<String>,
    /// Prefix for every subject line.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Recipient used by `test()` (defaults to the sender).
    #[serde(default)]
    pub test_recipient: Option<String>,
    /// SMTP command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

fn default_subject_prefix() -> String {
    "[notify-hub]".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl EmailConfig {
    pub fn channel_id(&self) -> &str {
        self.id.as_deref().unwrap_or(CHANNEL_EMAIL)
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            id: None,
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            use_tls: default_use_tls(),
            from_address: String::new(),
            from_name: None,
            recipient_domain: None,
            subject_prefix: default_subject_prefix(),
            test_recipient: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Email provider.
pub struct EmailProvider {
    config: EmailConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailProvider {
    /// Create a new email provider.
    ///
    /// A transport that cannot be built leaves the provider unavailable.
    pub fn new(config: EmailConfig) -> Self {
        let transport = if config.enabled && !config.smtp_host.is_empty() {
            match Self::build_transport(&config) {
                Ok(transport) => Some(transport),
                Err(e) => {
                    warn!(channel = %config.channel_id(), error = %e, "Email transport unavailable");
                    None
                }
            }
        } else {
            None
        };

        Self { config, transport }
    }

    fn build_transport(config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host).map_err(|e| {
                Error::config(format!("invalid SMTP relay {}: {}", config.smtp_host, e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Resolve a recipient id to a mailbox.
    fn resolve_address(&self, recipient: &str) -> Result<Mailbox> {
        let address = match (&self.config.recipient_domain, recipient.contains('@')) {
            (Some(domain), false) => format!("{}@{}", recipient, domain),
            _ => recipient.to_string(),
        };
        address
            .parse()
            .map_err(|e| Error::validation(format!("invalid email address {}: {}", address, e)))
    }

    fn sender(&self) -> Result<Mailbox> {
        let raw = match &self.config.from_name {
            Some(name) => format!("{} <{}>", name, self.config.from_address),
            None => self.config.from_address.clone(),
        };
        raw.parse()
            .map_err(|e| Error::config(format!("invalid from address {}: {}", raw, e)))
    }

    /// Build the email subject.
    fn build_subject(&self, request: &NotificationRequest) -> String {
        format!("{} {}", self.config.subject_prefix, request.render_title())
    }

    /// Build the email body (plain text).
    fn build_body_text(&self, request: &NotificationRequest) -> String {
        format!(
            "{}\n\n{}\n\nType: {}\nTime: {}",
            request.render_title(),
            request.render_message(),
            request.notification_type(),
            request.created_at().to_rfc3339()
        )
    }

    /// Build the email body (HTML).
    fn build_body_html(&self, request: &NotificationRequest) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background-color: #{:06x}; color: white; padding: 15px; border-radius: 5px; }}
        .content {{ padding: 20px; background-color: #f9f9f9; border-radius: 5px; margin-top: 10px; }}
        .footer {{ color: #666; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="header">
        <h2>{}</h2>
    </div>
    <div class="content">
        <p>{}</p>
    </div>
    <div class="footer">
        <p>Type: {} | Time: {}</p>
    </div>
</body>
</html>"#,
            type_color(request.notification_type()),
            escape_html(&request.render_title()),
            escape_html(&request.render_message()),
            request.notification_type(),
            request.created_at().to_rfc3339()
        )
    }

    fn build_message(&self, request: &NotificationRequest, to: Mailbox) -> Result<Message> {
        Message::builder()
            .from(self.sender()?)
            .to(to)
            .subject(self.build_subject(request))
            .multipart(MultiPart::alternative_plain_html(
                self.build_body_text(request),
                self.build_body_html(request),
            ))
            .map_err(|e| Error::provider(self.channel_id(), format!("invalid message: {}", e)))
    }

    /// Send one message per recipient. Succeeds only if every recipient was accepted.
    async fn deliver(&self, request: &NotificationRequest) -> Result<()> {
        let channel = self.channel_id();
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| Error::config(format!("email channel {} is not configured", channel)))?;

        let mut failures = 0usize;
        for recipient in request.recipients() {
            let outcome = match self.resolve_address(recipient) {
                Ok(to) => match self.build_message(request, to) {
                    Ok(message) => transport
                        .send(message)
                        .await
                        .map(|_| ())
                        .map_err(|e| Error::provider(channel, format!("SMTP send failed: {}", e))),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                failures += 1;
                warn!(
                    channel = %channel,
                    notification_id = %request.id(),
                    recipient = %recipient,
                    error = %e,
                    "Email delivery failed for recipient"
                );
            }
        }

        if failures > 0 {
            return Err(Error::provider(
                channel,
                format!(
                    "{} of {} recipients failed",
                    failures,
                    request.recipients().len()
                ),
            ));
        }
        Ok(())
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl ChannelProvider for EmailProvider {
    fn channel_id(&self) -> &str {
        self.config.channel_id()
    }

    fn is_available(&self) -> bool {
        self.config.enabled
            && self.transport.is_some()
            && !self.config.smtp_host.is_empty()
            && !self.config.from_address.is_empty()
    }

    async fn send(&self, request: &NotificationRequest) -> bool {
        match self.deliver(request).await {
            Ok(()) => {
                debug!(
                    channel = %self.channel_id(),
                    notification_id = %request.id(),
                    recipients = request.recipients().len(),
                    "Email notification sent"
                );
                true
            }
            Err(e) => {
                warn!(
                    channel = %self.channel_id(),
                    notification_id = %request.id(),
                    error = %e,
                    "Email notification failed"
                );
                false
            }
        }
    }

    async fn test(&self) -> Result<()> {
        let recipient = self
            .config
            .test_recipient
            .clone()
            .unwrap_or_else(|| self.config.from_address.clone());
        let request = test_request(self.channel_id(), &recipient)?;
        self.deliver(&request).await
    }
}
