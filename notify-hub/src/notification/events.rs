//! Domain event translation.
//!
//! Maps a closed set of domain event kinds to notification templates and
//! submits the resulting requests to the manager.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::manager::NotificationManager;
use super::request::{
    CHANNEL_EMAIL, CHANNEL_IN_APP, CHANNEL_PUSH, CHANNEL_WEBHOOK, NotificationRequest,
    NotificationType,
};
use crate::Result;

/// Event received from the application's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Event kinds that produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserRegistered,
    PasswordChanged,
    LoginAnomaly,
    TaskAssigned,
    TaskCompleted,
    DeadlineApproaching,
    CommentAdded,
    PaymentSucceeded,
    PaymentFailed,
    SystemMaintenance,
    SystemAlert,
}

/// Static metadata about a supported event kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventKindInfo {
    pub kind: EventKind,
    /// Canonical name (snake_case).
    pub event_type: &'static str,
    /// Additional accepted names.
    pub aliases: &'static [&'static str],
}

const EVENT_KINDS: &[EventKindInfo] = &[
    EventKindInfo {
        kind: EventKind::UserRegistered,
        event_type: "user_registered",
        aliases: &["user.registered", "user.created", "UserRegistered"],
    },
    EventKindInfo {
        kind: EventKind::PasswordChanged,
        event_type: "password_changed",
        aliases: &["user.password_changed", "PasswordChanged"],
    },
    EventKindInfo {
        kind: EventKind::LoginAnomaly,
        event_type: "login_anomaly",
        aliases: &["security.login_anomaly", "auth.suspicious_login", "LoginAnomaly"],
    },
    EventKindInfo {
        kind: EventKind::TaskAssigned,
        event_type: "task_assigned",
        aliases: &["task.assigned", "TaskAssigned"],
    },
    EventKindInfo {
        kind: EventKind::TaskCompleted,
        event_type: "task_completed",
        aliases: &["task.completed", "task.complete", "TaskCompleted"],
    },
    EventKindInfo {
        kind: EventKind::DeadlineApproaching,
        event_type: "deadline_approaching",
        aliases: &["task.deadline_approaching", "task.due_soon", "DeadlineApproaching"],
    },
    EventKindInfo {
        kind: EventKind::CommentAdded,
        event_type: "comment_added",
        aliases: &["comment.added", "comment.created", "CommentAdded"],
    },
    EventKindInfo {
        kind: EventKind::PaymentSucceeded,
        event_type: "payment_succeeded",
        aliases: &["payment.succeeded", "payment.success", "PaymentSucceeded"],
    },
    EventKindInfo {
        kind: EventKind::PaymentFailed,
        event_type: "payment_failed",
        aliases: &["payment.failed", "payment.failure", "PaymentFailed"],
    },
    EventKindInfo {
        kind: EventKind::SystemMaintenance,
        event_type: "system_maintenance",
        aliases: &["system.maintenance", "SystemMaintenance"],
    },
    EventKindInfo {
        kind: EventKind::SystemAlert,
        event_type: "system_alert",
        aliases: &["system.alert", "SystemAlert"],
    },
];

/// All supported event kinds.
pub fn event_kinds() -> &'static [EventKindInfo] {
    EVENT_KINDS
}

fn normalize_event_key(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | '.' | '-' | ' '))
        .collect()
}

/// Notification shape produced for an event kind.
#[derive(Debug, Clone, Copy)]
pub struct EventTemplate {
    pub title: &'static str,
    pub message: &'static str,
    pub notification_type: NotificationType,
    pub channels: &'static [&'static str],
    pub priority: u8,
}

impl EventTemplate {
    const fn new(
        title: &'static str,
        message: &'static str,
        notification_type: NotificationType,
        channels: &'static [&'static str],
        priority: u8,
    ) -> Self {
        Self {
            title,
            message,
            notification_type,
            channels,
            priority,
        }
    }
}

impl EventKind {
    /// Resolve an event name or alias, ignoring case and separators.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = normalize_event_key(input);
        if normalized.is_empty() {
            return None;
        }

        EVENT_KINDS
            .iter()
            .find(|info| {
                normalize_event_key(info.event_type) == normalized
                    || info
                        .aliases
                        .iter()
                        .any(|alias| normalize_event_key(alias) == normalized)
            })
            .map(|info| info.kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRegistered => "user_registered",
            Self::PasswordChanged => "password_changed",
            Self::LoginAnomaly => "login_anomaly",
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
            Self::DeadlineApproaching => "deadline_approaching",
            Self::CommentAdded => "comment_added",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
            Self::SystemMaintenance => "system_maintenance",
            Self::SystemAlert => "system_alert",
        }
    }

    pub fn template(&self) -> EventTemplate {
        use NotificationType::*;

        match self {
            Self::UserRegistered => EventTemplate::new(
                "Welcome, {{name}}!",
                "Your account has been created.",
                Success,
                &[CHANNEL_EMAIL, CHANNEL_IN_APP],
                5,
            ),
            Self::PasswordChanged => EventTemplate::new(
                "Password changed",
                "The password for your account was changed. Contact support if this was not you.",
                Warning,
                &[CHANNEL_EMAIL, CHANNEL_IN_APP],
                7,
            ),
            Self::LoginAnomaly => EventTemplate::new(
                "Unusual sign-in detected",
                "A sign-in from {{location}} was flagged as unusual.",
                Critical,
                &[CHANNEL_EMAIL, CHANNEL_PUSH, CHANNEL_IN_APP],
                9,
            ),
            Self::TaskAssigned => EventTemplate::new(
                "New task: {{task_title}}",
                "{{assigned_by}} assigned you a task.",
                Info,
                &[CHANNEL_PUSH, CHANNEL_IN_APP],
                5,
            ),
            Self::TaskCompleted => EventTemplate::new(
                "Task completed: {{task_title}}",
                "{{completed_by}} completed the task.",
                Success,
                &[CHANNEL_IN_APP],
                4,
            ),
            Self::DeadlineApproaching => EventTemplate::new(
                "Deadline approaching: {{task_title}}",
                "The task is due at {{due_at}}.",
                Warning,
                &[CHANNEL_EMAIL, CHANNEL_PUSH, CHANNEL_IN_APP],
                7,
            ),
            Self::CommentAdded => EventTemplate::new(
                "New comment from {{author}}",
                "{{comment}}",
                Info,
                &[CHANNEL_PUSH, CHANNEL_IN_APP],
                3,
            ),
            Self::PaymentSucceeded => EventTemplate::new(
                "Payment received",
                "Your payment of {{amount}} {{currency}} succeeded.",
                Success,
                &[CHANNEL_EMAIL, CHANNEL_IN_APP],
                5,
            ),
            Self::PaymentFailed => EventTemplate::new(
                "Payment failed",
                "Your payment of {{amount}} {{currency}} could not be processed: {{reason}}",
                Error,
                &[CHANNEL_EMAIL, CHANNEL_PUSH, CHANNEL_IN_APP],
                8,
            ),
            Self::SystemMaintenance => EventTemplate::new(
                "Scheduled maintenance",
                "Maintenance is planned from {{starts_at}} to {{ends_at}}.",
                Info,
                &[CHANNEL_EMAIL, CHANNEL_WEBHOOK, CHANNEL_IN_APP],
                4,
            ),
            Self::SystemAlert => EventTemplate::new(
                "System alert: {{component}}",
                "{{message}}",
                Critical,
                &[CHANNEL_WEBHOOK, CHANNEL_PUSH, CHANNEL_IN_APP],
                10,
            ),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides who receives the notification produced for an event.
pub trait RecipientResolver: Send + Sync {
    fn resolve(&self, kind: EventKind, event: &DomainEvent) -> Vec<String>;
}

/// Reads `data.recipients` (array of strings), falling back to `data.user_id`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataFieldResolver;

impl RecipientResolver for DataFieldResolver {
    fn resolve(&self, _kind: EventKind, event: &DomainEvent) -> Vec<String> {
        if let Some(Value::Array(items)) = event.data.get("recipients") {
            return items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        event
            .data
            .get("user_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    }
}

/// Turns domain events into notification requests.
pub struct EventToNotificationTranslator {
    manager: Arc<NotificationManager>,
    resolver: Arc<dyn RecipientResolver>,
}

impl EventToNotificationTranslator {
    pub fn new(manager: Arc<NotificationManager>) -> Self {
        Self::with_resolver(manager, Arc::new(DataFieldResolver))
    }

    pub fn with_resolver(
        manager: Arc<NotificationManager>,
        resolver: Arc<dyn RecipientResolver>,
    ) -> Self {
        Self { manager, resolver }
    }

    /// Build the request for `event`.
    ///
    /// `Ok(None)` when the kind is unknown or nobody should be notified.
    pub fn translate(&self, event: &DomainEvent) -> Result<Option<NotificationRequest>> {
        let Some(kind) = EventKind::parse(&event.kind) else {
            debug!(event_id = %event.id, kind = %event.kind, "Ignoring unhandled event kind");
            return Ok(None);
        };

        let recipients = self.resolver.resolve(kind, event);
        if recipients.is_empty() {
            debug!(event_id = %event.id, kind = %kind, "No recipients resolved for event");
            return Ok(None);
        }

        let template = kind.template();
        NotificationRequest::builder(template.title, template.message, recipients)
            .notification_type(template.notification_type)
            .channels(template.channels.iter().copied())
            .priority(template.priority)
            .template(kind.as_str())
            .data(event.data.clone())
            .metadata_entry("source_event_id", event.id.clone())
            .metadata_entry("event_kind", kind.as_str())
            .build()
            .map(Some)
    }

    /// Handle one event. `false` asks the bus to retry it.
    pub fn handle_event(&self, event: &DomainEvent) -> bool {
        match self.translate(event) {
            Ok(Some(request)) => self.manager.submit(request),
            Ok(None) => true,
            Err(e) => {
                warn!(event_id = %event.id, kind = %event.kind, error = %e, "Failed to build notification for event");
                false
            }
        }
    }

    /// Consume `rx` until it closes or `token` is cancelled.
    pub fn listen(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<DomainEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let translator = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Domain event listener shutting down");
                        break;
                    }
                    result = rx.recv() => {
                        match result {
                            Ok(event) => {
                                if !translator.handle_event(&event) {
                                    warn!(event_id = %event.id, kind = %event.kind, "Domain event was not handled");
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Domain event listener lagged by {} events", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Domain event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}
