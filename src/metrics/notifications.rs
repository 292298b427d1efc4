//! Operator notification forwarding.
//!
//! Classic multi-producer/single-consumer: any component can queue a
//! notification without blocking; one daemon drains the whole queue per tick
//! and hands each item to the configured sink. Items the sink rejects are
//! re-enqueued for the next tick — delivery is at-least-once and nothing is
//! deduplicated across restarts.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::agent::now_ms;

/// A single operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub content: String,
    pub component_id: String,
    pub participant_name: String,
    pub queued_at_ms: u64,
}

/// Destination for forwarded notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_notification(&self, notification: &Notification) -> Result<()>;
}

/// Sink that writes notifications to the log. The default when the
/// embedding process has nothing better to offer.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            "[{}] {}: {}",
            notification.participant_name,
            notification.component_id,
            notification.content
        );
        Ok(())
    }
}

/// Queue plus drain daemon in front of a [`NotificationSink`].
pub struct NotificationForwarder {
    tx: UnboundedSender<Notification>,
    rx: Mutex<Option<UnboundedReceiver<Notification>>>,
    sink: Arc<dyn NotificationSink>,
    drain_period: Duration,
    shutdown: CancellationToken,
}

impl NotificationForwarder {
    pub fn new(sink: Arc<dyn NotificationSink>, drain_period: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            sink,
            drain_period,
            shutdown: CancellationToken::new(),
        })
    }

    /// Queues a notification. Never blocks; producers on hot paths pay only
    /// a channel send.
    pub fn notify(&self, content: &str, component_id: &str, participant_name: &str) {
        let notification = Notification {
            content: content.to_string(),
            component_id: component_id.to_string(),
            participant_name: participant_name.to_string(),
            queued_at_ms: now_ms(),
        };
        if self.tx.send(notification).is_err() {
            tracing::warn!("Notification queue closed; dropping notification");
        }
    }

    /// Spawns the drain daemon. Calling twice is a no-op (the receiver is
    /// taken by the first call).
    pub fn start(self: &Arc<Self>) {
        let receiver = {
            let mut guard = self.rx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(mut receiver) = receiver else {
            tracing::warn!("Notification forwarder already started");
            return;
        };

        let forwarder = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(forwarder.drain_period);

            loop {
                tokio::select! {
                    _ = forwarder.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                // Drain everything queued since the last tick.
                let mut batch = Vec::new();
                while let Ok(notification) = receiver.try_recv() {
                    batch.push(notification);
                }

                for notification in batch {
                    if let Err(e) = forwarder.sink.send_notification(&notification).await {
                        tracing::warn!(
                            "Failed to forward notification from {}: {}; re-queueing",
                            notification.component_id,
                            e
                        );
                        let _ = forwarder.tx.send(notification);
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
