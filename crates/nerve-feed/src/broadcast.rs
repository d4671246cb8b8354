//! Event broadcaster
//!
//! Producers publish [`ChangeEvent`]s into a bounded queue without ever
//! blocking; a single [`Dispatcher`] task drains it, serializes each event
//! once and fans the text out to every connected subscriber.
//!
//! ## Lifecycle
//!
//! 1. `connect` sends the subscriber a `connected` message, then registers it
//! 2. The subscriber receives only events dispatched after registration
//! 3. A failed or timed-out send marks the subscriber dead; it is removed
//!    after the current pass and never retried
//! 4. When the queue is full the newest event is dropped and counted

use crate::cache::FeedStatus;
use crate::error::{NerveError, Result};
use crate::model::ChangeEvent;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 500;

/// Default bound on a single subscriber send
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscriber identifier
pub type SubscriberId = Uuid;

/// Messages sent to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// First message after joining
    Connected {
        /// Feed status at join time
        status: FeedStatus,
        /// Subscribers including the one joining
        active_clients: usize,
    },

    /// A tracked price changed
    AzPriceUpdate(ChangeEvent),

    /// Reply to a client `ping`
    Pong,
}

impl FeedMessage {
    /// Serialize for the wire
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Reply to a text frame sent by a subscriber, if any
pub fn reply_to(text: &str) -> Option<FeedMessage> {
    if text.trim() == "ping" {
        Some(FeedMessage::Pong)
    } else {
        None
    }
}

/// Write half of a subscriber's transport
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Send one text frame
    async fn send_text(&self, text: &str) -> Result<()>;
}

/// Result of a non-blocking publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Event is queued for dispatch
    Queued,
    /// Queue was full; the event was dropped
    Dropped,
    /// Dispatcher is gone; the event was discarded
    Closed,
}

/// Result of sending one event to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Frame was written
    Delivered,
    /// Transport reported an error
    Failed(String),
    /// Send did not complete in time
    TimedOut,
}

impl DeliveryStatus {
    /// Whether the subscriber should be removed
    pub fn is_dead(&self) -> bool {
        !matches!(self, Self::Delivered)
    }
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Successful sends
    pub delivered: usize,
    /// Subscribers removed after this pass
    pub removed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    removed: AtomicU64,
}

/// Broadcaster counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Events accepted into the queue
    pub published: u64,
    /// Events dropped because the queue was full
    pub dropped: u64,
    /// Individual subscriber sends that succeeded
    pub delivered: u64,
    /// Subscribers removed after a failed send
    pub removed: u64,
}

type SubscriberSet = Arc<RwLock<HashMap<SubscriberId, Arc<dyn EventSink>>>>;

/// Publishing and connection handle
///
/// Cheap to clone; every clone feeds the same queue and subscriber set.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: mpsc::Sender<ChangeEvent>,
    subscribers: SubscriberSet,
    counters: Arc<Counters>,
}

impl EventBroadcaster {
    /// Create a broadcaster and the dispatcher that drains it
    pub fn channel(capacity: usize, send_timeout: Duration) -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscribers: SubscriberSet = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(Counters::default());

        let broadcaster = Self {
            tx,
            subscribers: subscribers.clone(),
            counters: counters.clone(),
        };
        let dispatcher = Dispatcher {
            rx,
            subscribers,
            counters,
            send_timeout,
        };
        (broadcaster, dispatcher)
    }

    /// Enqueue an event without waiting
    pub fn publish(&self, event: ChangeEvent) -> PublishOutcome {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                PublishOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(region = %event.region, sku = %event.sku, "Broadcast queue full, dropping event");
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Dispatcher stopped, discarding event");
                PublishOutcome::Closed
            }
        }
    }

    /// Greet a new subscriber and register it
    ///
    /// The `connected` message is sent before registration, so it always
    /// precedes any event. A subscriber whose greeting fails is never added.
    pub async fn connect(&self, sink: Arc<dyn EventSink>, status: FeedStatus) -> Result<SubscriberId> {
        let id = Uuid::new_v4();
        let greeting = FeedMessage::Connected {
            status,
            active_clients: self.subscriber_count().await + 1,
        };
        sink.send_text(&greeting.to_text()?).await?;

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, sink);
        info!(subscriber = %id, active = subscribers.len(), "Subscriber connected");
        Ok(id)
    }

    /// Remove a subscriber; returns false if it was already gone
    pub async fn disconnect(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!(subscriber = %id, active = subscribers.len(), "Subscriber disconnected");
        }
        removed
    }

    /// Number of registered subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
        }
    }
}

/// Queue consumer that fans events out to subscribers
pub struct Dispatcher {
    rx: mpsc::Receiver<ChangeEvent>,
    subscribers: SubscriberSet,
    counters: Arc<Counters>,
    send_timeout: Duration,
}

impl Dispatcher {
    /// Drain the queue until every broadcaster handle is dropped
    pub async fn run(mut self) {
        info!("Event dispatcher started");
        while let Some(event) = self.rx.recv().await {
            self.dispatch(&event).await;
        }
        info!("Event dispatcher stopped");
    }

    /// Send one event to every subscriber, then remove the dead ones
    pub async fn dispatch(&self, event: &ChangeEvent) -> DispatchReport {
        let text = match FeedMessage::AzPriceUpdate(event.clone()).to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, sku = %event.sku, "Failed to serialize change event");
                return DispatchReport::default();
            }
        };

        let targets: Vec<(SubscriberId, Arc<dyn EventSink>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, sink)| (*id, sink.clone()))
            .collect();

        if targets.is_empty() {
            return DispatchReport::default();
        }

        let sends = targets.iter().map(|(id, sink)| {
            let text = text.as_str();
            async move { (*id, self.deliver(sink.as_ref(), text).await) }
        });
        let statuses = join_all(sends).await;

        let mut report = DispatchReport::default();
        let mut dead = Vec::new();
        for (id, status) in statuses {
            if status.is_dead() {
                debug!(subscriber = %id, status = ?status, "Delivery failed");
                dead.push(id);
            } else {
                report.delivered += 1;
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &dead {
                if subscribers.remove(id).is_some() {
                    report.removed += 1;
                }
            }
            info!(removed = report.removed, active = subscribers.len(), "Removed dead subscribers");
        }

        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .removed
            .fetch_add(report.removed as u64, Ordering::Relaxed);
        report
    }

    async fn deliver(&self, sink: &dyn EventSink, text: &str) -> DeliveryStatus {
        match tokio::time::timeout(self.send_timeout, sink.send_text(text)).await {
            Ok(Ok(())) => DeliveryStatus::Delivered,
            Ok(Err(e)) => e.into(),
            Err(_) => DeliveryStatus::TimedOut,
        }
    }
}

impl From<NerveError> for DeliveryStatus {
    fn from(e: NerveError) -> Self {
        Self::Failed(e.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::sinks::*;
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn status() -> FeedStatus {
        FeedStatus {
            cycle_count: 3,
            last_cycle: Some(Utc::now()),
            regions: vec!["A".to_string()],
            total_offers: 2,
            recent_errors: vec![],
        }
    }

    fn event(sku: &str, old: f64, new: f64) -> ChangeEvent {
        ChangeEvent {
            region: "A".to_string(),
            az: Some("a-1".to_string()),
            sku: sku.to_string(),
            hardware_name: "Tesla T4 (16GB)".to_string(),
            old_price: old,
            new_price: new,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_message_wire_format() {
        let text = FeedMessage::AzPriceUpdate(event("x", 1.2, 1.35)).to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "az_price_update");
        assert_eq!(value["region"], "A");
        assert_eq!(value["az"], "a-1");
        assert_eq!(value["old_price"], 1.2);
        assert_eq!(value["new_price"], 1.35);
        assert_eq!(value["currency"], "USD");

        assert_eq!(FeedMessage::Pong.to_text().unwrap(), r#"{"type":"pong"}"#);

        let connected = FeedMessage::Connected {
            status: status(),
            active_clients: 1,
        };
        let value: serde_json::Value = serde_json::from_str(&connected.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["active_clients"], 1);
        assert_eq!(value["status"]["cycle_count"], 3);
    }

    #[test]
    fn test_ping_gets_pong() {
        assert_eq!(reply_to("ping"), Some(FeedMessage::Pong));
        assert_eq!(reply_to(" ping\n"), Some(FeedMessage::Pong));
        assert_eq!(reply_to("hello"), None);
    }

    #[tokio::test]
    async fn test_publish_drops_newest_when_full() {
        let (broadcaster, _dispatcher) = EventBroadcaster::channel(2, DEFAULT_SEND_TIMEOUT);

        assert_eq!(broadcaster.publish(event("a", 1.0, 2.0)), PublishOutcome::Queued);
        assert_eq!(broadcaster.publish(event("b", 1.0, 2.0)), PublishOutcome::Queued);
        assert_eq!(broadcaster.publish(event("c", 1.0, 2.0)), PublishOutcome::Dropped);

        let stats = broadcaster.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_default_capacity_accepts_exactly_capacity_events() {
        let (broadcaster, _dispatcher) = EventBroadcaster::channel(DEFAULT_CAPACITY, DEFAULT_SEND_TIMEOUT);
        let queued = (0..DEFAULT_CAPACITY + 1)
            .map(|i| broadcaster.publish(event(&format!("s{}", i), 1.0, 2.0)))
            .filter(|o| *o == PublishOutcome::Queued)
            .count();
        assert_eq!(queued, DEFAULT_CAPACITY);
        assert_eq!(broadcaster.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_publish_after_dispatcher_gone_is_closed() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(4, DEFAULT_SEND_TIMEOUT);
        drop(dispatcher);
        assert_eq!(broadcaster.publish(event("a", 1.0, 2.0)), PublishOutcome::Closed);
    }

    #[tokio::test]
    async fn test_connected_message_precedes_events() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let sink = Arc::new(RecordingSink::default());

        let id = assert_ok!(broadcaster.connect(sink.clone(), status()).await);
        dispatcher.dispatch(&event("x", 1.2, 1.35)).await;

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], FeedMessage::Connected { active_clients: 1, .. }));
        assert!(matches!(&messages[1], FeedMessage::AzPriceUpdate(e) if e.sku == "x"));

        assert!(broadcaster.disconnect(id).await);
        assert!(!broadcaster.disconnect(id).await);
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_gets_no_further_events() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let staying = Arc::new(RecordingSink::default());
        let leaving = Arc::new(RecordingSink::default());

        broadcaster.connect(staying.clone(), status()).await.unwrap();
        let leaving_id = broadcaster.connect(leaving.clone(), status()).await.unwrap();
        assert!(broadcaster.disconnect(leaving_id).await);

        let report = dispatcher.dispatch(&event("x", 1.0, 2.0)).await;
        assert_eq!(report, DispatchReport { delivered: 1, removed: 0 });

        assert_eq!(leaving.frames().len(), 1);
        assert!(matches!(&leaving.messages()[0], FeedMessage::Connected { .. }));
        assert_eq!(staying.frames().len(), 2);
        assert!(matches!(&staying.messages()[1], FeedMessage::AzPriceUpdate(e) if e.sku == "x"));
    }

    #[tokio::test]
    async fn test_active_clients_counts_the_joiner() {
        let (broadcaster, _dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());

        broadcaster.connect(first, status()).await.unwrap();
        broadcaster.connect(second.clone(), status()).await.unwrap();

        assert!(matches!(
            &second.messages()[0],
            FeedMessage::Connected { active_clients: 2, .. }
        ));
        assert_eq!(broadcaster.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn test_late_joiner_misses_earlier_events() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let early = Arc::new(RecordingSink::default());
        broadcaster.connect(early.clone(), status()).await.unwrap();

        dispatcher.dispatch(&event("x", 1.0, 1.1)).await;

        let late = Arc::new(RecordingSink::default());
        broadcaster.connect(late.clone(), status()).await.unwrap();
        dispatcher.dispatch(&event("x", 1.1, 1.2)).await;

        assert_eq!(early.frames().len(), 3);
        assert_eq!(late.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_greeting_does_not_register() {
        let (broadcaster, _dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let sink = Arc::new(FailingSink::after(0));
        assert_err!(broadcaster.connect(sink, status()).await);
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_removed_others_unaffected() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let healthy = Arc::new(RecordingSink::default());
        let broken = Arc::new(FailingSink::after(1));

        broadcaster.connect(healthy.clone(), status()).await.unwrap();
        broadcaster.connect(broken, status()).await.unwrap();

        let report = dispatcher.dispatch(&event("x", 1.0, 2.0)).await;
        assert_eq!(report, DispatchReport { delivered: 1, removed: 1 });
        assert_eq!(broadcaster.subscriber_count().await, 1);

        let report = dispatcher.dispatch(&event("x", 2.0, 3.0)).await;
        assert_eq!(report, DispatchReport { delivered: 1, removed: 0 });
        assert_eq!(healthy.frames().len(), 3);

        let stats = broadcaster.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.removed, 1);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(8, Duration::from_millis(50));
        let stalled = Arc::new(StalledSink {
            greeted: Mutex::new(false),
        });
        broadcaster.connect(stalled, status()).await.unwrap();

        let report = dispatcher.dispatch(&event("x", 1.0, 2.0)).await;
        assert_eq!(report.removed, 1);
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_drains_queue() {
        let (broadcaster, dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        let sink = Arc::new(RecordingSink::default());
        broadcaster.connect(sink.clone(), status()).await.unwrap();

        broadcaster.publish(event("a", 1.0, 2.0));
        broadcaster.publish(event("b", 1.0, 2.0));
        drop(broadcaster);

        dispatcher.run().await;

        let skus: Vec<String> = sink
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                FeedMessage::AzPriceUpdate(e) => Some(e.sku),
                _ => None,
            })
            .collect();
        assert_eq!(skus, vec!["a", "b"]);
    }

    #[test]
    fn test_delivery_status_conversions() {
        assert!(DeliveryStatus::from(NerveError::delivery("x")).is_dead());
        assert!(DeliveryStatus::TimedOut.is_dead());
        assert!(!DeliveryStatus::Delivered.is_dead());
    }
}
