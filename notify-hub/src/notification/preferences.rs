//! Per-recipient channel preferences.
//!
//! Resolution rule: a channel is enabled for a recipient unless the
//! recipient's preference for that channel is explicitly `false`. This is the
//! only place that rule lives.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{Error, Result};

/// Channel id → opted in.
pub type ChannelPreferences = HashMap<String, bool>;

/// Source of per-recipient, per-channel opt-in/opt-out flags.
pub trait PreferenceStore: Send + Sync {
    /// The explicit preference, or `None` when the recipient never set one.
    fn get_preference(&self, recipient: &str, channel: &str) -> Option<bool>;

    /// Full map stored for `recipient`, for read-modify-write callers.
    fn preferences(&self, _recipient: &str) -> Option<ChannelPreferences> {
        None
    }

    /// Replace the full map of `recipient`. Stores backed by an external
    /// system may be read-only.
    fn set_preferences(&self, _recipient: &str, _preferences: ChannelPreferences) -> Result<()> {
        Err(Error::config("preference store is read-only"))
    }

    /// Whether `channel` may be used for `recipient` (unset ⇒ enabled).
    fn is_enabled(&self, recipient: &str, channel: &str) -> bool {
        self.get_preference(recipient, channel).unwrap_or(true)
    }

    /// Keep the recipients of `recipients` that have `channel` enabled,
    /// preserving their order.
    fn eligible_recipients(&self, recipients: &[String], channel: &str) -> Vec<String> {
        recipients
            .iter()
            .filter(|r| self.is_enabled(r, channel))
            .cloned()
            .collect()
    }
}

/// In-process preference map, safe to update while the worker reads it.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    preferences: RwLock<HashMap<String, ChannelPreferences>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full preference map of `recipient`. Entries not present in
    /// `preferences` fall back to the default.
    pub fn set(&self, recipient: impl Into<String>, preferences: ChannelPreferences) {
        self.preferences.write().insert(recipient.into(), preferences);
    }

    /// Snapshot of the map stored for `recipient`.
    pub fn get(&self, recipient: &str) -> Option<ChannelPreferences> {
        self.preferences.read().get(recipient).cloned()
    }

    /// Forget everything stored for `recipient`.
    pub fn remove(&self, recipient: &str) -> Option<ChannelPreferences> {
        self.preferences.write().remove(recipient)
    }

    pub fn len(&self) -> usize {
        self.preferences.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.read().is_empty()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get_preference(&self, recipient: &str, channel: &str) -> Option<bool> {
        self.preferences
            .read()
            .get(recipient)
            .and_then(|prefs| prefs.get(channel).copied())
    }

    fn preferences(&self, recipient: &str) -> Option<ChannelPreferences> {
        self.get(recipient)
    }

    fn set_preferences(&self, recipient: &str, preferences: ChannelPreferences) -> Result<()> {
        self.set(recipient, preferences);
        Ok(())
    }
}
