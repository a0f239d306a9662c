//! Realtime push provider.
//!
//! Publishes one [`PushMessage`] per recipient on a broadcast channel.
//! Transport layers (WebSocket, SSE, mobile gateways) subscribe and forward
//! messages to connected clients of the addressed recipient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChannelProvider, test_request};
use crate::notification::request::{CHANNEL_PUSH, NotificationRequest, NotificationType};
use crate::{Error, Result};

/// Message delivered to push subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub recipient: String,
    pub notification_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: u8,
    pub data: Map<String, Value>,
    pub sent_at: DateTime<Utc>,
}

/// Push provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Channel id override (default: `push`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Broadcast buffer; slow subscribers lag past this many messages.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

fn default_buffer() -> usize {
    1024
}

impl PushConfig {
    pub fn channel_id(&self) -> &str {
        self.id.as_deref().unwrap_or(CHANNEL_PUSH)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            id: None,
            enabled: false,
            buffer: default_buffer(),
        }
    }
}

/// Realtime push provider.
pub struct PushProvider {
    config: PushConfig,
    tx: broadcast::Sender<PushMessage>,
}

impl PushProvider {
    /// Create a new push provider.
    pub fn new(config: PushConfig) -> Self {
        let (tx, _) = broadcast::channel(config.buffer.max(1));
        Self { config, tx }
    }

    /// Subscribe to pushed messages.
    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn build_message(request: &NotificationRequest, recipient: &str) -> PushMessage {
        PushMessage {
            recipient: recipient.to_string(),
            notification_id: request.id().to_string(),
            title: request.render_title(),
            message: request.render_message(),
            notification_type: request.notification_type(),
            priority: request.priority(),
            data: request.data().clone(),
            sent_at: Utc::now(),
        }
    }

    /// Publish to every recipient; returns how many subscribers saw each message.
    fn publish(&self, request: &NotificationRequest) -> usize {
        let mut delivered = 0;
        for recipient in request.recipients() {
            // No subscribers means nobody is connected; that is not a failure.
            if let Ok(receivers) = self.tx.send(Self::build_message(request, recipient)) {
                delivered = receivers;
            }
        }
        delivered
    }
}

#[async_trait]
impl ChannelProvider for PushProvider {
    fn channel_id(&self) -> &str {
        self.config.channel_id()
    }

    fn is_available(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, request: &NotificationRequest) -> bool {
        let subscribers = self.publish(request);
        debug!(
            channel = %self.channel_id(),
            notification_id = %request.id(),
            recipients = request.recipients().len(),
            subscribers,
            "Push notification published"
        );
        true
    }

    async fn test(&self) -> Result<()> {
        if !self.is_available() {
            return Err(Error::config(format!(
                "push channel {} is disabled",
                self.channel_id()
            )));
        }
        let request = test_request(self.channel_id(), "test")?;
        self.publish(&request);
        Ok(())
    }
}
