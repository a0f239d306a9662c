//! Channel providers.
//!
//! This module provides the providers that deliver a notification over one
//! channel each:
//! - Email (SMTP)
//! - Realtime push (in-process broadcast to transport layers)
//! - Chat webhooks (generic JSON, Discord, Slack)
//! - In-app inbox (bounded per-recipient store)

mod email;
mod in_app;
mod push;
mod webhook;

pub use email::{EmailConfig, EmailProvider};
pub use in_app::{InAppConfig, InAppProvider, DEFAULT_INBOX_CAPACITY};
pub use push::{PushConfig, PushMessage, PushProvider};
pub use webhook::{WebhookAuth, WebhookConfig, WebhookFormat, WebhookProvider};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::request::{NotificationRequest, NotificationType};
use crate::Result;

/// Delivery capability for one channel.
///
/// `send` never fails loudly: internal errors are logged and reported as
/// `false`, so one broken channel cannot affect the others.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Id under which the provider is registered.
    fn channel_id(&self) -> &str;

    /// Configuration presence check. Must not perform I/O.
    fn is_available(&self) -> bool;

    /// Deliver `request` to its (already channel-scoped) recipients.
    async fn send(&self, request: &NotificationRequest) -> bool;

    /// Push a synthetic notification through the provider, surfacing errors.
    async fn test(&self) -> Result<()>;
}

/// Provider configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelConfig {
    /// SMTP email.
    Email(EmailConfig),
    /// Chat/HTTP webhook.
    Webhook(WebhookConfig),
    /// Realtime push broadcast.
    RealtimePush(PushConfig),
    /// In-app inbox.
    InApp(InAppConfig),
}

impl ChannelConfig {
    /// Channel id the built provider registers under.
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Email(c) => c.channel_id(),
            Self::Webhook(c) => c.channel_id(),
            Self::RealtimePush(c) => c.channel_id(),
            Self::InApp(c) => c.channel_id(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Email(c) => c.enabled,
            Self::Webhook(c) => c.enabled,
            Self::RealtimePush(c) => c.enabled,
            Self::InApp(c) => c.enabled,
        }
    }

    /// Build the provider described by this configuration.
    pub fn build(&self) -> Arc<dyn ChannelProvider> {
        match self {
            Self::Email(c) => Arc::new(EmailProvider::new(c.clone())),
            Self::Webhook(c) => Arc::new(WebhookProvider::new(c.clone())),
            Self::RealtimePush(c) => Arc::new(PushProvider::new(c.clone())),
            Self::InApp(c) => Arc::new(InAppProvider::new(c.clone())),
        }
    }
}

/// Embed/accent colour for a notification type.
pub(crate) fn type_color(notification_type: NotificationType) -> u32 {
    match notification_type {
        NotificationType::Info => 0x3498db,     // Blue
        NotificationType::Success => 0x2ecc71,  // Green
        NotificationType::Warning => 0xf39c12,  // Orange
        NotificationType::Error => 0xe74c3c,    // Red
        NotificationType::Critical => 0x8e44ad, // Purple
    }
}

/// Synthetic request used by `ChannelProvider::test`.
pub(crate) fn test_request(channel: &str, recipient: &str) -> Result<NotificationRequest> {
    NotificationRequest::builder(
        "notify-hub test",
        format!("Test notification for channel {channel}"),
        [recipient],
    )
    .channel(channel)
    .metadata_entry("test", true)
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_tagging() {
        let json = r#"[
            {"type": "Email", "enabled": true, "smtp_host": "smtp.example.com", "from_address": "noreply@example.com"},
            {"type": "Webhook", "enabled": true, "url": "https://chat.example.com/hook", "format": "slack"},
            {"type": "RealtimePush", "enabled": true},
            {"type": "InApp", "enabled": true, "id": "inbox", "capacity": 5}
        ]"#;

        let configs: Vec<ChannelConfig> = serde_json::from_str(json).unwrap();
        let ids: Vec<&str> = configs.iter().map(|c| c.channel_id()).collect();
        assert_eq!(ids, vec!["email", "webhook", "push", "inbox"]);
        assert!(configs.iter().all(|c| c.is_enabled()));

        let providers: Vec<_> = configs.iter().map(|c| c.build()).collect();
        assert_eq!(providers[3].channel_id(), "inbox");
        assert!(providers[3].is_available());
    }

    #[test]
    fn test_request_targets_channel() {
        let request = test_request("push", "tester").unwrap();
        assert!(request.channels().contains("push"));
        assert_eq!(request.recipients(), ["tester".to_string()]);
        assert_eq!(request.metadata()["test"], true);
    }
}
