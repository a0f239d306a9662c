//! notify-hub: multi-channel notification dispatch.
//!
//! Producers submit [`notification::NotificationRequest`]s (directly or via
//! domain events) to a [`notification::NotificationManager`], whose worker
//! delivers them over the registered channel providers while honouring
//! per-recipient channel preferences.

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
