//! Bounded, drop-on-full in-process message bus.
//!
//! Each subscriber owns a bounded `mpsc` channel; `publish` is a non-blocking `try_send`
//! per matching subscriber, so a slow or stalled Target Worker never backs up a Source
//! Worker's binlog read loop. A shutdown is additionally broadcast on a `broadcast`
//! channel every subscriber selects against, so blocked dequeues return immediately even
//! when their own queue is empty.

pub mod message;

pub use message::{ControlKind, Message, Payload, BROADCAST_TARGET};

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, Mutex};

const DEFAULT_CAPACITY: usize = 10_000;

/// Minimum gap between "bus queue full" warnings, so a sustained overflow logs once
/// every few seconds instead of once per dropped message.
const DROP_WARN_INTERVAL_SECS: i64 = 5;

pub struct Subscription {
    pub rx: mpsc::Receiver<Message>,
    pub shutdown_rx: broadcast::Receiver<()>,
}

#[derive(Default)]
pub struct BusStats {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
}

pub struct MessageBus {
    capacity: usize,
    subscribers: Mutex<HashMap<String, mpsc::Sender<Message>>>,
    shutdown_tx: broadcast::Sender<()>,
    pub stats: BusStats,
    last_drop_warn_secs: AtomicI64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            capacity,
            subscribers: Mutex::new(HashMap::new()),
            shutdown_tx,
            stats: BusStats::default(),
            last_drop_warn_secs: AtomicI64::new(0),
        }
    }

    pub async fn subscribe(&self, target_name: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.lock().await;
        subs.insert(target_name.to_string(), tx);
        Subscription {
            rx,
            shutdown_rx: self.shutdown_tx.subscribe(),
        }
    }

    /// A standalone shutdown receiver for callers that only publish (Source Workers
    /// never dequeue bus messages, so they have no reason to register as a subscriber).
    pub fn shutdown_subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Non-blocking enqueue. Returns `true` if delivered to at least one subscriber,
    /// `false` if every matching subscriber's queue was full (counted as a drop).
    pub async fn publish(&self, msg: Message) -> bool {
        let subs = self.subscribers.lock().await;
        let mut delivered = false;
        let mut dropped_any = false;

        if msg.target_name == BROADCAST_TARGET {
            for tx in subs.values() {
                if tx.try_send(msg.clone()).is_ok() {
                    delivered = true;
                } else {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    dropped_any = true;
                }
            }
        } else if let Some(tx) = subs.get(&msg.target_name) {
            if tx.try_send(msg).is_ok() {
                delivered = true;
            } else {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                dropped_any = true;
            }
        }

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        if dropped_any {
            self.warn_drop(&msg.target_name);
        }
        delivered
    }

    /// Logs a WARN at most once per `DROP_WARN_INTERVAL_SECS`, regardless of how many
    /// messages are actually dropped in that window.
    fn warn_drop(&self, target_name: &str) {
        let now = now_secs();
        let last = self.last_drop_warn_secs.load(Ordering::Relaxed);
        if now - last < DROP_WARN_INTERVAL_SECS {
            return;
        }
        if self
            .last_drop_warn_secs
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::warn!(
                target_name,
                dropped_total = self.stats.dropped.load(Ordering::Relaxed),
                "bus subscriber queue full, dropping message"
            );
        }
    }

    /// Broadcasts the shutdown signal; every subscriber's blocked `rx.recv()` races this
    /// in a `tokio::select!` and returns immediately.
    pub fn publish_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn published(&self) -> u64 {
        self.stats.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Approximate current total queue depth, summed across every subscriber.
    pub async fn total_queue_depth(&self) -> i64 {
        let subs = self.subscribers.lock().await;
        subs.values()
            .map(|tx| (self.capacity - tx.capacity()) as i64)
            .sum()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BinlogPosition, RowEventKind};

    fn dummy_event() -> crate::model::RowEvent {
        crate::model::RowEvent {
            event_id: "a".into(),
            kind: RowEventKind::Insert,
            source_name: "src".into(),
            schema: "appdb".into(),
            table: "users".into(),
            values: std::collections::HashMap::new(),
            before_values: None,
            binlog_position: None::<BinlogPosition>,
            server_id: None,
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_subscriber_only() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe("a").await;
        let mut b = bus.subscribe("b").await;

        assert!(bus.publish(Message::row("a", dummy_event())).await);
        assert!(a.rx.try_recv().is_ok());
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let bus = MessageBus::with_capacity(1);
        let _sub = bus.subscribe("a").await;
        assert!(bus.publish(Message::row("a", dummy_event())).await);
        assert!(!bus.publish(Message::row("a", dummy_event())).await);
        assert_eq!(bus.dropped(), 1);
    }

    #[tokio::test]
    async fn queue_depth_reflects_unconsumed_messages() {
        let bus = MessageBus::with_capacity(4);
        let _sub = bus.subscribe("a").await;
        assert_eq!(bus.total_queue_depth().await, 0);
        bus.publish(Message::row("a", dummy_event())).await;
        bus.publish(Message::row("a", dummy_event())).await;
        assert_eq!(bus.total_queue_depth().await, 2);
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_subscriber() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("a").await;
        bus.publish_shutdown();
        tokio::select! {
            _ = sub.rx.recv() => panic!("no message should have arrived"),
            _ = sub.shutdown_rx.recv() => {}
        }
    }
}
