//! In-app inbox provider.
//!
//! Keeps a bounded list per recipient. When a list is full the oldest entry
//! is evicted. Read state is kept in the stored copy's metadata under
//! `read` and `read_at`.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ChannelProvider, test_request};
use crate::notification::request::{CHANNEL_IN_APP, NotificationRequest};
use crate::{Error, Result};

/// Default number of notifications kept per recipient.
pub const DEFAULT_INBOX_CAPACITY: usize = 100;

/// Throwaway inbox used by [`ChannelProvider::test`].
const TEST_RECIPIENT: &str = "__notify_hub_test__";

const READ_KEY: &str = "read";
const READ_AT_KEY: &str = "read_at";

/// In-app provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppConfig {
    /// Channel id override (default: `in_app`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Notifications kept per recipient.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

impl InAppConfig {
    pub fn channel_id(&self) -> &str {
        self.id.as_deref().unwrap_or(CHANNEL_IN_APP)
    }
}

impl Default for InAppConfig {
    fn default() -> Self {
        Self {
            id: None,
            enabled: true,
            capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

fn is_read(request: &NotificationRequest) -> bool {
    request
        .metadata()
        .get(READ_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn mark_read(request: &mut NotificationRequest) {
    let metadata = request.metadata_mut();
    metadata.insert(READ_KEY.to_string(), Value::Bool(true));
    metadata.insert(
        READ_AT_KEY.to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
}

/// In-app inbox provider.
pub struct InAppProvider {
    config: InAppConfig,
    inboxes: DashMap<String, VecDeque<NotificationRequest>>,
}

impl InAppProvider {
    /// Create a new in-app provider. A zero capacity is raised to one.
    pub fn new(config: InAppConfig) -> Self {
        let config = InAppConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            config,
            inboxes: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Store one copy of `request` for each of its recipients.
    fn store(&self, request: &NotificationRequest) {
        for recipient in request.recipients() {
            let copy = request.scoped_to(vec![recipient.clone()]);
            let mut inbox = self.inboxes.entry(recipient.clone()).or_default();
            while inbox.len() >= self.config.capacity {
                if let Some(evicted) = inbox.pop_front() {
                    debug!(
                        recipient = %recipient,
                        notification_id = %evicted.id(),
                        "Evicted oldest in-app notification"
                    );
                }
            }
            inbox.push_back(copy);
        }
    }

    /// Notifications of `recipient`, oldest first.
    pub fn list(&self, recipient: &str, unread_only: bool) -> Vec<NotificationRequest> {
        self.inboxes
            .get(recipient)
            .map(|inbox| {
                inbox
                    .iter()
                    .filter(|n| !unread_only || !is_read(n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unread_count(&self, recipient: &str) -> usize {
        self.inboxes
            .get(recipient)
            .map(|inbox| inbox.iter().filter(|n| !is_read(n)).count())
            .unwrap_or(0)
    }

    /// Mark one notification as read.
    pub fn mark_as_read(&self, recipient: &str, notification_id: &str) -> Result<()> {
        let mut inbox = self
            .inboxes
            .get_mut(recipient)
            .ok_or_else(|| Error::not_found("Inbox", recipient))?;
        let notification = inbox
            .iter_mut()
            .find(|n| n.id() == notification_id)
            .ok_or_else(|| Error::not_found("InAppNotification", notification_id))?;
        if !is_read(notification) {
            mark_read(notification);
        }
        Ok(())
    }

    /// Mark every notification of `recipient` as read; returns how many changed.
    pub fn mark_all_read(&self, recipient: &str) -> usize {
        let Some(mut inbox) = self.inboxes.get_mut(recipient) else {
            return 0;
        };
        let mut changed = 0;
        for notification in inbox.iter_mut().filter(|n| !is_read(n)) {
            mark_read(notification);
            changed += 1;
        }
        changed
    }

    /// Drop the inbox of `recipient`; returns how many notifications it held.
    pub fn clear(&self, recipient: &str) -> usize {
        self.inboxes
            .remove(recipient)
            .map(|(_, inbox)| inbox.len())
            .unwrap_or(0)
    }
}

impl Default for InAppProvider {
    fn default() -> Self {
        Self::new(InAppConfig::default())
    }
}

#[async_trait]
impl ChannelProvider for InAppProvider {
    fn channel_id(&self) -> &str {
        self.config.channel_id()
    }

    fn is_available(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, request: &NotificationRequest) -> bool {
        self.store(request);
        debug!(
            channel = %self.channel_id(),
            notification_id = %request.id(),
            recipients = request.recipients().len(),
            "In-app notification stored"
        );
        true
    }

    async fn test(&self) -> Result<()> {
        if !self.is_available() {
            return Err(Error::config(format!(
                "in-app channel {} is disabled",
                self.channel_id()
            )));
        }

        let request = test_request(self.channel_id(), TEST_RECIPIENT)?;
        self.store(&request);
        let stored = self
            .list(TEST_RECIPIENT, false)
            .iter()
            .any(|n| n.id() == request.id());
        self.clear(TEST_RECIPIENT);

        if stored {
            Ok(())
        } else {
            Err(Error::config(format!(
                "in-app channel {} did not store the test notification",
                self.channel_id()
            )))
        }
    }
}
