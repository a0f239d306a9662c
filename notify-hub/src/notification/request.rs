//! Notification requests.
//!
//! A [`NotificationRequest`] is the immutable description of one notification
//! intent. It can only be obtained through [`NotificationRequestBuilder::build`],
//! which enforces the request invariants, so every request seen by the
//! manager is deliverable in principle.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::template;
use crate::{Error, Result};

/// Channel id of the email provider.
pub const CHANNEL_EMAIL: &str = "email";
/// Channel id of the realtime push provider.
pub const CHANNEL_PUSH: &str = "push";
/// Channel id of the chat webhook provider.
pub const CHANNEL_WEBHOOK: &str = "webhook";
/// Channel id of the in-app inbox provider.
pub const CHANNEL_IN_APP: &str = "in_app";

/// Lowest accepted priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 10;
/// Priority used when none is given.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    #[default]
    Info,
    Warning,
    Error,
    Success,
    Critical,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification intent, addressed to a set of channels and recipients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRequest {
    id: String,
    title: String,
    message: String,
    #[serde(rename = "type")]
    notification_type: NotificationType,
    channels: BTreeSet<String>,
    recipients: Vec<String>,
    data: Map<String, Value>,
    created_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    priority: u8,
    template: Option<String>,
    attachments: Vec<String>,
    metadata: HashMap<String, Value>,
}

impl NotificationRequest {
    /// Start building a request. Defaults: type `info`, channels `{in_app}`,
    /// priority 5, immediate, never expires.
    pub fn builder(
        title: impl Into<String>,
        message: impl Into<String>,
        recipients: impl IntoIterator<Item = impl Into<String>>,
    ) -> NotificationRequestBuilder {
        NotificationRequestBuilder::new(title, message, recipients)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    /// Requested channels, in a stable (sorted) order.
    pub fn channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Provider-owned metadata (e.g. read flags kept by the in-app inbox).
    pub fn metadata_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.metadata
    }

    /// `true` once `now` is past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// `true` when the request is not expired and its scheduled time has come.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.scheduled_at.is_none_or(|scheduled_at| now >= scheduled_at)
    }

    /// Copy of this request restricted to `recipients`, used for one channel.
    pub fn scoped_to(&self, recipients: Vec<String>) -> Self {
        Self {
            recipients,
            ..self.clone()
        }
    }

    /// Title with `{{key}}` placeholders filled from the request data.
    pub fn render_title(&self) -> String {
        template::render(&self.title, &self.data)
    }

    /// Message with `{{key}}` placeholders filled from the request data.
    pub fn render_message(&self) -> String {
        template::render(&self.message, &self.data)
    }

    /// Re-check the construction invariants.
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(Error::validation("notification must have at least one recipient"));
        }
        if self.channels.is_empty() {
            return Err(Error::validation("notification must target at least one channel"));
        }
        if self.channels.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::validation("channel ids must not be blank"));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(Error::validation(format!(
                "priority {} is outside {}..={}",
                self.priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }
        if let (Some(scheduled_at), Some(expires_at)) = (self.scheduled_at, self.expires_at) {
            if scheduled_at > expires_at {
                return Err(Error::validation(format!(
                    "scheduled_at {} is after expires_at {}",
                    scheduled_at.to_rfc3339(),
                    expires_at.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`NotificationRequest`].
#[derive(Debug, Clone)]
pub struct NotificationRequestBuilder {
    id: Option<String>,
    title: String,
    message: String,
    recipients: Vec<String>,
    notification_type: NotificationType,
    channels: Option<BTreeSet<String>>,
    data: Map<String, Value>,
    created_at: Option<DateTime<Utc>>,
    scheduled_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    priority: u8,
    template: Option<String>,
    attachments: Vec<String>,
    metadata: HashMap<String, Value>,
}

impl NotificationRequestBuilder {
    fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        recipients: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            message: message.into(),
            recipients: recipients.into_iter().map(Into::into).collect(),
            notification_type: NotificationType::default(),
            channels: None,
            data: Map::new(),
            created_at: None,
            scheduled_at: None,
            expires_at: None,
            priority: DEFAULT_PRIORITY,
            template: None,
            attachments: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Use an explicit id instead of a generated UUID.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn notification_type(mut self, notification_type: NotificationType) -> Self {
        self.notification_type = notification_type;
        self
    }

    /// Add one channel. The first call replaces the `{in_app}` default.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channels
            .get_or_insert_with(BTreeSet::new)
            .insert(channel.into());
        self
    }

    /// Replace the channel set.
    pub fn channels(mut self, channels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn data_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachments.push(attachment.into());
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate and produce the request.
    pub fn build(self) -> Result<NotificationRequest> {
        let channels = self
            .channels
            .unwrap_or_else(|| BTreeSet::from([CHANNEL_IN_APP.to_string()]));

        let request = NotificationRequest {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: self.title,
            message: self.message,
            notification_type: self.notification_type,
            channels,
            recipients: self.recipients,
            data: self.data,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            scheduled_at: self.scheduled_at,
            expires_at: self.expires_at,
            priority: self.priority,
            template: self.template,
            attachments: self.attachments,
            metadata: self.metadata,
        };
        request.validate()?;
        Ok(request)
    }
}
