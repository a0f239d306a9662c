//! Notification dispatch.
//!
//! This module provides multi-channel delivery of notification requests:
//! - Request model with validation, scheduling and expiry
//! - Channel providers (email, realtime push, chat webhooks, in-app inbox)
//! - Per-recipient channel preferences
//! - A queue drained by a single cooperative worker
//! - Translation of domain events into requests

pub mod channels;
pub mod events;
pub mod manager;
pub mod preferences;
pub mod queue;
pub mod request;
pub mod stats;
pub mod template;
mod worker;

pub use channels::{ChannelConfig, ChannelProvider};
pub use events::{
    DataFieldResolver, DomainEvent, EventKind, EventToNotificationTranslator, RecipientResolver,
};
pub use manager::{DeliveryResult, DispatchReport, NotificationManager};
pub use preferences::{ChannelPreferences, InMemoryPreferenceStore, PreferenceStore};
pub use queue::{DispatchQueue, QueueMode};
pub use request::{NotificationRequest, NotificationRequestBuilder, NotificationType};
pub use stats::{DeliveryCounts, NotificationStats};
