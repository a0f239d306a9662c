//! Integration tests for the notify-hub dispatch pipeline.
//!
//! These tests drive a real manager and worker with in-process providers
//! that record what they were asked to deliver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use notify_hub::config::NotifyConfig;
use notify_hub::notification::{
    ChannelProvider, NotificationManager, NotificationRequest, NotificationType, PreferenceStore,
    QueueMode,
};

/// Provider that records every scoped request it receives.
struct RecordingProvider {
    id: String,
    available: bool,
    outcome: bool,
    sent: Mutex<Vec<NotificationRequest>>,
}

impl RecordingProvider {
    fn new(id: &str) -> Arc<Self> {
        Self::with_outcome(id, true, true)
    }

    fn with_outcome(id: &str, available: bool, outcome: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            available,
            outcome,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().clone()
    }

    fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().iter().map(|r| r.id().to_string()).collect()
    }
}

#[async_trait]
impl ChannelProvider for RecordingProvider {
    fn channel_id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn send(&self, request: &NotificationRequest) -> bool {
        self.sent.lock().push(request.clone());
        self.outcome
    }

    async fn test(&self) -> notify_hub::Result<()> {
        Ok(())
    }
}

/// Provider whose send blocks until released.
struct SlowProvider {
    started: Notify,
    release: Notify,
    calls: AtomicUsize,
    finished: AtomicBool,
}

impl SlowProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ChannelProvider for SlowProvider {
    fn channel_id(&self) -> &str {
        "slow"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn send(&self, _request: &NotificationRequest) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        self.finished.store(true, Ordering::SeqCst);
        true
    }

    async fn test(&self) -> notify_hub::Result<()> {
        Ok(())
    }
}

/// Preference store that panics when asked about recipient `bad`.
struct PanickingPreferences;

impl PreferenceStore for PanickingPreferences {
    fn get_preference(&self, recipient: &str, _channel: &str) -> Option<bool> {
        if recipient == "bad" {
            panic!("preference backend failure");
        }
        None
    }
}

fn fast_config() -> NotifyConfig {
    NotifyConfig {
        poll_timeout_ms: 20,
        ..Default::default()
    }
}

fn scheduled_request(id: &str, priority: u8, delay: chrono::Duration) -> NotificationRequest {
    NotificationRequest::builder("title", "message", ["u1"])
        .id(id)
        .channel("chat")
        .priority(priority)
        .scheduled_at(Utc::now() + delay)
        .build()
        .expect("valid request")
}

fn request(id: &str, channels: &[&str], recipients: &[&str]) -> NotificationRequest {
    NotificationRequest::builder("title", "message", recipients.iter().copied())
        .id(id)
        .channels(channels.iter().copied())
        .build()
        .expect("valid request")
}

/// Poll `condition` until it holds or one second passes.
async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

mod dispatch_tests {
    use super::*;

    #[tokio::test]
    async fn test_one_result_per_channel() {
        let manager = NotificationManager::new();
        manager.register_provider(RecordingProvider::new("a"));
        manager.register_provider(RecordingProvider::with_outcome("b", true, false));

        let results = manager
            .dispatch(&request("n1", &["a", "b", "c"], &["u1"]))
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.get("a"), Some(&true));
        assert_eq!(results.get("b"), Some(&false));
        assert_eq!(results.get("c"), Some(&false));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let manager = NotificationManager::new();
        let first = RecordingProvider::new("chat");
        let second = RecordingProvider::new("chat");
        manager.register_provider(first.clone());
        manager.register_provider(second.clone());

        manager.dispatch(&request("n1", &["chat"], &["u1"])).await;

        assert!(first.sent().is_empty());
        assert_eq!(second.sent_ids(), vec!["n1"]);
    }

    #[tokio::test]
    async fn test_preference_law() {
        let manager = NotificationManager::new();
        let push = RecordingProvider::new("push");
        manager.register_provider(push.clone());
        manager
            .set_preferences("u1", HashMap::from([("push".to_string(), false)]))
            .unwrap();
        manager
            .set_preferences("u2", HashMap::from([("email".to_string(), false)]))
            .unwrap();

        let results = manager
            .dispatch(&request("n1", &["push"], &["u1", "u2", "u3"]))
            .await;

        assert!(results["push"]);
        assert_eq!(push.sent()[0].recipients(), ["u2".to_string(), "u3".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_failure_law() {
        let manager = NotificationManager::new();
        let down = RecordingProvider::with_outcome("down", false, true);
        let up = RecordingProvider::new("up");
        manager.register_provider(down.clone());
        manager.register_provider(up.clone());

        let results = manager
            .dispatch(&request("n1", &["down", "up"], &["u1"]))
            .await;

        assert!(!results["down"]);
        assert!(results["up"]);
        assert!(down.sent().is_empty());

        let stats = manager.get_stats();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.channel("down").failed, 1);
        assert_eq!(stats.channel("up").sent, 1);
    }

    /// u2 disabled email: only u1 receives it and the channel succeeds.
    #[tokio::test]
    async fn test_scenario_recipient_opted_out() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let email = RecordingProvider::new("email");
        manager.register_provider(email.clone());
        manager
            .set_preferences("u2", HashMap::from([("email".to_string(), false)]))
            .unwrap();

        let mut reports = manager.subscribe();
        manager.start();
        assert!(manager.submit(request("n1", &["email"], &["u1", "u2"])));

        let report = timeout(Duration::from_secs(1), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.request_id, "n1");
        assert_eq!(report.results.get("email"), Some(&true));
        assert_eq!(email.sent()[0].recipients(), ["u1".to_string()]);

        manager.stop().await;
    }
}

mod worker_tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_request_is_dropped() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());

        let expired = NotificationRequest::builder("t", "m", ["u1"])
            .id("old")
            .channel("chat")
            .expires_at(Utc::now() - chrono::Duration::seconds(1))
            .build()
            .unwrap();
        assert!(manager.submit(expired));
        assert!(manager.submit(request("fresh", &["chat"], &["u1"])));

        manager.start();
        wait_until(|| !chat.sent().is_empty()).await;
        manager.stop().await;

        assert_eq!(chat.sent_ids(), vec!["fresh"]);
        let stats = manager.get_stats();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.total_failed, 0);
    }

    #[tokio::test]
    async fn test_scheduled_request_waits_until_due() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());
        manager.start();

        let due = Utc::now() + chrono::Duration::milliseconds(200);
        let scheduled = NotificationRequest::builder("t", "m", ["u1"])
            .id("later")
            .channel("chat")
            .scheduled_at(due)
            .build()
            .unwrap();
        assert!(manager.submit(scheduled));

        sleep(Duration::from_millis(50)).await;
        assert!(chat.sent().is_empty());

        wait_until(|| !chat.sent().is_empty()).await;
        assert!(Utc::now() >= due);
        assert_eq!(chat.sent_ids(), vec!["later"]);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());

        for priority in 1..=5u8 {
            let request = NotificationRequest::builder("t", "m", ["u1"])
                .id(format!("p{priority}"))
                .channel("chat")
                .priority(priority)
                .build()
                .unwrap();
            assert!(manager.submit(request));
        }

        manager.start();
        wait_until(|| chat.sent().len() == 5).await;
        manager.stop().await;

        assert_eq!(chat.sent_ids(), vec!["p1", "p2", "p3", "p4", "p5"]);
    }

    #[tokio::test]
    async fn test_priority_mode_order() {
        let config = NotifyConfig {
            queue_mode: QueueMode::Priority,
            ..fast_config()
        };
        let manager = Arc::new(NotificationManager::with_config(config));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());

        for (id, priority) in [("a", 3u8), ("b", 9), ("c", 3), ("d", 1)] {
            let request = NotificationRequest::builder("t", "m", ["u1"])
                .id(id)
                .channel("chat")
                .priority(priority)
                .build()
                .unwrap();
            assert!(manager.submit(request));
        }

        manager.start();
        wait_until(|| chat.sent().len() == 4).await;
        manager.stop().await;

        assert_eq!(chat.sent_ids(), vec!["b", "a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_future_high_priority_does_not_block_ready_low_priority() {
        let config = NotifyConfig {
            queue_mode: QueueMode::Priority,
            ..fast_config()
        };
        let manager = Arc::new(NotificationManager::with_config(config));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());

        assert!(manager.submit(scheduled_request("later", 10, chrono::Duration::seconds(2))));
        let ready = NotificationRequest::builder("t", "m", ["u1"])
            .id("ready")
            .channel("chat")
            .priority(1)
            .build()
            .unwrap();
        assert!(manager.submit(ready));

        manager.start();
        wait_until(|| !chat.sent().is_empty()).await;
        manager.stop().await;

        assert_eq!(chat.sent_ids(), vec!["ready"]);
        assert_eq!(manager.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_pending_scheduled_requests_do_not_delay_immediate_one() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());

        for i in 0..50 {
            let id = format!("later-{i}");
            assert!(manager.submit(scheduled_request(&id, 5, chrono::Duration::seconds(30))));
        }
        manager.start();
        sleep(Duration::from_millis(30)).await;

        let submitted = tokio::time::Instant::now();
        assert!(manager.submit(request("now", &["chat"], &["u1"])));
        wait_until(|| !chat.sent().is_empty()).await;
        assert!(submitted.elapsed() < Duration::from_millis(250));
        manager.stop().await;

        assert_eq!(chat.sent_ids(), vec!["now"]);
        assert_eq!(manager.queue_len(), 50);
    }

    #[tokio::test]
    async fn test_worker_survives_panic_outside_provider() {
        let manager = Arc::new(NotificationManager::with_preferences(
            fast_config(),
            Arc::new(PanickingPreferences),
        ));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());
        manager.start();

        assert!(manager.submit(request("boom", &["chat"], &["bad"])));
        assert!(manager.submit(request("ok", &["chat"], &["u1"])));

        wait_until(|| !chat.sent().is_empty()).await;
        assert!(manager.is_running());
        assert_eq!(chat.sent_ids(), vec!["ok"]);

        // The panicking dispatch never reached statistics.
        let stats = manager.get_stats();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.total_failed, 0);
        manager.stop().await;
    }

    /// `stop` waits for the in-flight send and nothing else is dequeued.
    #[tokio::test]
    async fn test_stop_waits_for_in_flight_send() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let slow = SlowProvider::new();
        manager.register_provider(slow.clone());
        manager.start();

        assert!(manager.submit(request("first", &["slow"], &["u1"])));
        timeout(Duration::from_secs(1), slow.started.notified())
            .await
            .unwrap();
        assert!(manager.submit(request("second", &["slow"], &["u1"])));

        let stopper = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.stop().await })
        };
        sleep(Duration::from_millis(50)).await;
        assert!(!stopper.is_finished());
        assert!(!slow.finished.load(Ordering::SeqCst));

        slow.release.notify_one();
        timeout(Duration::from_secs(1), stopper)
            .await
            .unwrap()
            .unwrap();

        assert!(slow.finished.load(Ordering::SeqCst));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.queue_len(), 1);
        assert!(!manager.is_running());
        assert!(!manager.submit(request("third", &["slow"], &["u1"])));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_restartable() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let chat = RecordingProvider::new("chat");
        manager.register_provider(chat.clone());

        manager.start();
        manager.start();
        assert!(manager.is_running());
        manager.stop().await;
        assert!(!manager.is_running());

        assert!(!manager.submit(request("n1", &["chat"], &["u1"])));
        manager.start();
        assert!(manager.submit(request("n2", &["chat"], &["u1"])));
        wait_until(|| chat.sent().len() == 1).await;
        manager.stop().await;

        assert_eq!(chat.sent_ids(), vec!["n2"]);
    }

    #[tokio::test]
    async fn test_invalid_request_never_queued() {
        let manager = NotificationManager::new();
        let empty = NotificationRequest::builder("t", "m", Vec::<String>::new()).build();
        assert!(empty.unwrap_err().is_validation());
        assert_eq!(manager.queue_len(), 0);
    }
}

mod inbox_tests {
    use super::*;
    use notify_hub::notification::{DomainEvent, EventToNotificationTranslator};
    use serde_json::json;

    #[tokio::test]
    async fn test_event_reaches_inbox() {
        let manager = Arc::new(NotificationManager::with_config(fast_config()));
        let translator = EventToNotificationTranslator::new(Arc::clone(&manager));
        let inbox = manager.inbox().expect("default inbox");
        let mut reports = manager.subscribe();
        manager.start();

        let serde_json::Value::Object(data) =
            json!({"user_id": "u1", "task_title": "Ship it", "assigned_by": "Ana"})
        else {
            unreachable!()
        };
        let event = DomainEvent::new("task.assigned", data);
        assert!(translator.handle_event(&event));

        let report = timeout(Duration::from_secs(1), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.notification_type, NotificationType::Info);
        assert_eq!(report.results.get("in_app"), Some(&true));
        // No push provider is registered by default.
        assert_eq!(report.results.get("push"), Some(&false));
        manager.stop().await;

        let stored = inbox.list("u1", true);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].render_title(), "New task: Ship it");
        assert_eq!(stored[0].render_message(), "Ana assigned you a task.");
        assert_eq!(stored[0].metadata()["source_event_id"], event.id.as_str());

        inbox.mark_as_read("u1", stored[0].id()).unwrap();
        assert_eq!(inbox.unread_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_inbox_capacity_from_config() {
        let config = NotifyConfig {
            inbox_capacity: 2,
            ..fast_config()
        };
        let manager = NotificationManager::with_config(config);

        for id in ["n1", "n2", "n3"] {
            manager.dispatch(&request(id, &["in_app"], &["u1"])).await;
        }

        let ids: Vec<String> = manager
            .inbox()
            .unwrap()
            .list("u1", false)
            .iter()
            .map(|n| n.id().to_string())
            .collect();
        assert_eq!(ids, vec!["n2", "n3"]);
    }
}
