//! Metrics Module Tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::agent::MetricsAgent;
use super::notifications::{Notification, NotificationForwarder, NotificationSink};

// ============================================================
// METRICS AGENT
// ============================================================

#[test]
fn test_increment_and_read_back() {
    let agent = MetricsAgent::new();

    agent.increment("wup-1", "tasks-registered");
    agent.increment("wup-1", "tasks-registered");
    agent.increment("wup-2", "tasks-registered");

    assert_eq!(agent.count_of("wup-1", "tasks-registered"), 2);
    assert_eq!(agent.count_of("wup-2", "tasks-registered"), 1);
    assert_eq!(agent.count_of("wup-3", "tasks-registered"), 0);
}

#[test]
fn test_touch_instant_records_a_timestamp() {
    let agent = MetricsAgent::new();

    assert_eq!(agent.instant_of("wup-1", "last-probe"), None);
    agent.touch_instant("wup-1", "last-probe");
    assert!(agent.instant_of("wup-1", "last-probe").is_some());

    let mut ids = agent.component_ids();
    ids.sort();
    assert_eq!(ids, vec!["wup-1"]);
}

// ============================================================
// NOTIFICATION FORWARDING
// ============================================================

struct CollectingSink {
    received: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        self.received.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Fails the first `failures` deliveries, then accepts everything.
struct FlakySink {
    failures: AtomicUsize,
    received: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for FlakySink {
    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("sink unavailable"));
        }
        self.received.lock().await.push(notification.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_forwarder_drains_queue_per_tick() {
    let sink = Arc::new(CollectingSink {
        received: Mutex::new(Vec::new()),
    });
    let forwarder = NotificationForwarder::new(sink.clone(), Duration::from_millis(20));

    forwarder.notify("aggregate failed", "watchdog", "site::zone::svc::metrics::1");
    forwarder.notify("subscription active", "coordinator", "site::zone::svc::subscriptions::1");
    forwarder.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    forwarder.stop();

    let received = sink.received.lock().await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].component_id, "watchdog");
}

#[tokio::test]
async fn test_failed_forward_is_requeued_and_retried() {
    let sink = Arc::new(FlakySink {
        failures: AtomicUsize::new(1),
        received: Mutex::new(Vec::new()),
    });
    let forwarder = NotificationForwarder::new(sink.clone(), Duration::from_millis(20));

    forwarder.notify("only message", "component", "participant");
    forwarder.start();

    // First tick fails and re-queues; a later tick delivers.
    tokio::time::sleep(Duration::from_millis(300)).await;
    forwarder.stop();

    let received = sink.received.lock().await;
    assert_eq!(received.len(), 1, "At-least-once delivery after a failure");
    assert_eq!(received[0].content, "only message");
}
