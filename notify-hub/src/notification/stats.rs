//! Delivery statistics.
//!
//! Written only by the dispatch path, readable at any time through
//! [`DeliveryStats::snapshot`].

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::request::NotificationType;

/// Sent/failed pair for one breakdown key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub sent: u64,
    pub failed: u64,
}

impl DeliveryCounts {
    fn record(&mut self, success: bool) {
        if success {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Point-in-time copy of the delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationStats {
    /// Channel deliveries that succeeded.
    pub total_sent: u64,
    /// Channel deliveries that failed, were unavailable, or had no eligible recipient.
    pub total_failed: u64,
    /// Breakdown by channel id.
    pub by_channel: HashMap<String, DeliveryCounts>,
    /// Breakdown by notification type.
    pub by_type: HashMap<NotificationType, DeliveryCounts>,
}

impl NotificationStats {
    pub fn channel(&self, channel: &str) -> DeliveryCounts {
        self.by_channel.get(channel).copied().unwrap_or_default()
    }

    pub fn notification_type(&self, notification_type: NotificationType) -> DeliveryCounts {
        self.by_type
            .get(&notification_type)
            .copied()
            .unwrap_or_default()
    }
}

/// Live counters. One lock covers every field, so a snapshot never sees a
/// half-recorded outcome.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    inner: Mutex<NotificationStats>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one channel outcome of a dispatch.
    pub fn record(&self, channel: &str, notification_type: NotificationType, success: bool) {
        let mut stats = self.inner.lock();
        if success {
            stats.total_sent += 1;
        } else {
            stats.total_failed += 1;
        }

        stats
            .by_channel
            .entry(channel.to_string())
            .or_default()
            .record(success);
        stats
            .by_type
            .entry(notification_type)
            .or_default()
            .record(success);
    }

    pub fn snapshot(&self) -> NotificationStats {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = DeliveryStats::new().snapshot();
        assert_eq!(stats, NotificationStats::default());
        assert_eq!(stats.channel("email"), DeliveryCounts::default());
    }

    #[test]
    fn test_record_breakdowns() {
        let stats = DeliveryStats::new();
        stats.record("email", NotificationType::Info, true);
        stats.record("email", NotificationType::Warning, false);
        stats.record("push", NotificationType::Info, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_sent, 2);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.channel("email"), DeliveryCounts { sent: 1, failed: 1 });
        assert_eq!(snapshot.channel("push"), DeliveryCounts { sent: 1, failed: 0 });
        assert_eq!(
            snapshot.notification_type(NotificationType::Info),
            DeliveryCounts { sent: 2, failed: 0 }
        );
        assert_eq!(
            snapshot.notification_type(NotificationType::Warning),
            DeliveryCounts { sent: 0, failed: 1 }
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let stats = DeliveryStats::new();
        stats.record("email", NotificationType::Info, true);
        let before = stats.snapshot();
        stats.record("email", NotificationType::Info, true);
        assert_eq!(before.total_sent, 1);
        assert_eq!(stats.snapshot().total_sent, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = DeliveryStats::new();
        stats.record("in_app", NotificationType::Critical, false);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["by_type"]["critical"]["failed"], 1);
        assert_eq!(json["by_channel"]["in_app"]["failed"], 1);
    }

    #[test]
    fn test_snapshot_totals_match_breakdowns_under_contention() {
        let stats = std::sync::Arc::new(DeliveryStats::new());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let stats = std::sync::Arc::clone(&stats);
                std::thread::spawn(move || {
                    for n in 0..500 {
                        stats.record(&format!("c{i}"), NotificationType::Info, n % 3 != 0);
                    }
                })
            })
            .collect();

        while !writers.iter().all(|w| w.is_finished()) {
            let snapshot = stats.snapshot();
            let sent: u64 = snapshot.by_channel.values().map(|c| c.sent).sum();
            let failed: u64 = snapshot.by_channel.values().map(|c| c.failed).sum();
            assert_eq!(snapshot.total_sent, sent);
            assert_eq!(snapshot.total_failed, failed);
            assert_eq!(snapshot.notification_type(NotificationType::Info).sent, sent);
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_sent + snapshot.total_failed, 2000);
    }
}
