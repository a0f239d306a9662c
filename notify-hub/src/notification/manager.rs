//! Notification manager.
//!
//! The NotificationManager is responsible for:
//! - Keeping the channel provider registry
//! - Filtering recipients per channel through the preference store
//! - Dispatching requests and recording delivery statistics
//! - Owning the dispatch queue and the worker lifecycle

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::{
    ChannelConfig, ChannelProvider, InAppConfig, InAppProvider, PushProvider,
};
use super::preferences::{ChannelPreferences, InMemoryPreferenceStore, PreferenceStore};
use super::queue::DispatchQueue;
use super::request::{CHANNEL_IN_APP, NotificationRequest, NotificationType};
use super::stats::{DeliveryStats, NotificationStats};
use super::worker;
use crate::config::NotifyConfig;
use crate::{Error, Result};

/// Channel id → delivered.
pub type DeliveryResult = BTreeMap<String, bool>;

/// Outcome of one dispatch, published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub request_id: String,
    pub notification_type: NotificationType,
    pub results: DeliveryResult,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchReport {
    /// Whether every channel of the request succeeded.
    pub fn all_delivered(&self) -> bool {
        self.results.values().all(|ok| *ok)
    }
}

struct WorkerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// The notification manager.
pub struct NotificationManager {
    config: NotifyConfig,
    providers: RwLock<HashMap<String, Arc<dyn ChannelProvider>>>,
    preferences: Arc<dyn PreferenceStore>,
    stats: DeliveryStats,
    queue: DispatchQueue,
    report_tx: broadcast::Sender<DispatchReport>,
    worker: Mutex<Option<WorkerHandle>>,
    stopped: AtomicBool,
    inbox: Option<Arc<InAppProvider>>,
    push: Option<Arc<PushProvider>>,
}

impl NotificationManager {
    /// Create a manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(NotifyConfig::default())
    }

    /// Create a manager and register the providers described by `config`.
    pub fn with_config(config: NotifyConfig) -> Self {
        Self::with_preferences(config, Arc::new(InMemoryPreferenceStore::new()))
    }

    /// Create a manager backed by an external preference store.
    pub fn with_preferences(config: NotifyConfig, preferences: Arc<dyn PreferenceStore>) -> Self {
        let (report_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let queue = DispatchQueue::new(config.queue_mode, config.max_queue_size.max(1));

        let mut manager = Self {
            providers: RwLock::new(HashMap::new()),
            preferences,
            stats: DeliveryStats::new(),
            queue,
            report_tx,
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
            inbox: None,
            push: None,
            config,
        };

        manager.init_providers();
        manager
    }

    /// Register providers from configuration, plus a default in-app inbox
    /// unless the configuration declares `in_app` itself.
    fn init_providers(&mut self) {
        let mut providers = HashMap::new();
        let mut in_app_declared = false;

        for channel_config in &self.config.channels {
            if channel_config.channel_id() == CHANNEL_IN_APP {
                in_app_declared = true;
            }

            if !channel_config.is_enabled() {
                debug!(
                    channel = %channel_config.channel_id(),
                    "Skipping disabled notification channel"
                );
                continue;
            }

            let provider: Arc<dyn ChannelProvider> = match channel_config {
                ChannelConfig::InApp(c) if c.channel_id() == CHANNEL_IN_APP => {
                    let inbox = Arc::new(InAppProvider::new(c.clone()));
                    self.inbox = Some(Arc::clone(&inbox));
                    inbox
                }
                ChannelConfig::RealtimePush(c) => {
                    let push = Arc::new(PushProvider::new(c.clone()));
                    if self.push.is_none() {
                        self.push = Some(Arc::clone(&push));
                    }
                    push
                }
                other => other.build(),
            };

            info!(channel = %provider.channel_id(), "Initialized notification channel");
            providers.insert(provider.channel_id().to_string(), provider);
        }

        if !in_app_declared {
            let inbox = Arc::new(InAppProvider::new(InAppConfig {
                capacity: self.config.inbox_capacity,
                ..Default::default()
            }));
            self.inbox = Some(Arc::clone(&inbox));
            providers.insert(CHANNEL_IN_APP.to_string(), inbox);
        }

        info!(
            channels = providers.len(),
            queue_mode = ?self.config.queue_mode,
            "Notification manager initialized"
        );
        *self.providers.get_mut() = providers;
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Register a provider under its channel id. Last write wins.
    pub fn register_provider(&self, provider: Arc<dyn ChannelProvider>) {
        let channel = provider.channel_id().to_string();
        if self
            .providers
            .write()
            .insert(channel.clone(), provider)
            .is_some()
        {
            info!(channel = %channel, "Replaced notification channel provider");
        } else {
            info!(channel = %channel, "Registered notification channel provider");
        }
    }

    pub fn unregister_provider(&self, channel: &str) -> Option<Arc<dyn ChannelProvider>> {
        let removed = self.providers.write().remove(channel);
        if removed.is_some() {
            info!(channel = %channel, "Unregistered notification channel provider");
        }
        removed
    }

    pub fn provider(&self, channel: &str) -> Option<Arc<dyn ChannelProvider>> {
        self.providers.read().get(channel).cloned()
    }

    /// Registered channel ids, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.providers.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// The in-app inbox built from configuration (or the default one).
    ///
    /// Not updated when another provider is later registered as `in_app`.
    pub fn inbox(&self) -> Option<Arc<InAppProvider>> {
        self.inbox.clone()
    }

    /// The first realtime push provider built from configuration.
    pub fn push(&self) -> Option<Arc<PushProvider>> {
        self.push.clone()
    }

    /// Replace the full preference map of `recipient`.
    pub fn set_preferences(
        &self,
        recipient: impl AsRef<str>,
        preferences: ChannelPreferences,
    ) -> Result<()> {
        self.preferences
            .set_preferences(recipient.as_ref(), preferences)
    }

    pub fn preferences(&self, recipient: &str) -> Option<ChannelPreferences> {
        self.preferences.preferences(recipient)
    }

    /// Deliver `request` on each of its channels now.
    ///
    /// Every channel yields exactly one entry. A missing or unavailable
    /// provider, an empty eligible recipient set, a `false` send and a
    /// panicking send all count as a failed delivery.
    pub async fn dispatch(&self, request: &NotificationRequest) -> DeliveryResult {
        let mut results = DeliveryResult::new();

        for channel in request.channels() {
            let success = self.dispatch_channel(channel, request).await;
            self.stats
                .record(channel, request.notification_type(), success);
            results.insert(channel.clone(), success);
        }

        debug!(
            notification_id = %request.id(),
            results = ?results,
            "Notification dispatched"
        );

        // No receivers is fine.
        let _ = self.report_tx.send(DispatchReport {
            request_id: request.id().to_string(),
            notification_type: request.notification_type(),
            results: results.clone(),
            dispatched_at: Utc::now(),
        });

        results
    }

    async fn dispatch_channel(&self, channel: &str, request: &NotificationRequest) -> bool {
        let Some(provider) = self.provider(channel) else {
            debug!(channel = %channel, notification_id = %request.id(), "No provider registered for channel");
            return false;
        };

        if !provider.is_available() {
            debug!(channel = %channel, notification_id = %request.id(), "Channel provider unavailable");
            return false;
        }

        let eligible = self
            .preferences
            .eligible_recipients(request.recipients(), channel);
        if eligible.is_empty() {
            debug!(
                channel = %channel,
                notification_id = %request.id(),
                "No recipients have this channel enabled"
            );
            return false;
        }

        let scoped = request.scoped_to(eligible);
        match AssertUnwindSafe(provider.send(&scoped)).catch_unwind().await {
            Ok(success) => {
                if !success {
                    warn!(channel = %channel, notification_id = %request.id(), "Channel delivery failed");
                }
                success
            }
            Err(panic) => {
                error!(
                    channel = %channel,
                    notification_id = %request.id(),
                    panic = %worker::panic_message(panic.as_ref()),
                    "Channel provider panicked during send"
                );
                false
            }
        }
    }

    /// Validate and enqueue `request` for the worker. Returns once queued.
    pub fn dispatch_async(&self, request: NotificationRequest) -> Result<()> {
        request.validate()?;
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }

        let id = request.id().to_string();
        self.queue.push(request)?;
        debug!(notification_id = %id, queued = self.queue.len(), "Notification queued");
        Ok(())
    }

    /// Acceptance acknowledgement for `request`; not a delivery guarantee.
    pub fn submit(&self, request: NotificationRequest) -> bool {
        let id = request.id().to_string();
        match self.dispatch_async(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(notification_id = %id, error = %e, "Notification rejected");
                false
            }
        }
    }

    pub fn get_stats(&self) -> NotificationStats {
        self.stats.snapshot()
    }

    /// Subscribe to dispatch reports.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchReport> {
        self.report_tx.subscribe()
    }

    /// Run the self-test of the provider registered under `channel`.
    pub async fn test_channel(&self, channel: &str) -> Result<()> {
        let provider = self
            .provider(channel)
            .ok_or_else(|| Error::not_found("ChannelProvider", channel))?;
        provider.test().await
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.task.is_finished())
    }

    /// Start the dispatch worker. Does nothing if it is already running.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            debug!("Dispatch worker already running");
            return;
        }

        self.stopped.store(false, Ordering::Release);
        let token = CancellationToken::new();
        let task = tokio::spawn(worker::run(Arc::clone(self), token.clone()));
        *worker = Some(WorkerHandle { token, task });
        info!("Notification manager started");
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A dispatch in flight completes first. Queued requests stay queued and
    /// are picked up again by a later `start`.
    pub async fn stop(&self) {
        info!("Stopping notification manager");
        self.stopped.store(true, Ordering::Release);

        let handle = self.worker.lock().take();
        if let Some(WorkerHandle { token, task }) = handle {
            token.cancel();
            if let Err(e) = task.await {
                warn!("Dispatch worker terminated abnormally: {}", e);
            }
        }

        let remaining = self.queue.len();
        if remaining > 0 {
            info!(remaining, "Notification manager stopped with queued requests");
        } else {
            info!("Notification manager stopped");
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}
