//! Event Bus & SSE Fan-out (C10): a process-wide broadcaster the resolver
//! and manager publish onto, and the admin surface's SSE stream reads
//! from. Grounded on the broadcast-based pub/sub shape used for cache
//! invalidation fan-out elsewhere in the ecosystem, adapted here to carry
//! resolver log entries and server lifecycle events instead of cache keys.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::log::LogEntry;

const DEFAULT_QUEUE_SIZE: usize = 256;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log(LogEntry),
    Status(StatusSnapshot),
    Drivers { kind: String },
    Keepalive,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub cache_size: usize,
    pub uptime_secs: u64,
}

/// Wraps a `tokio::sync::broadcast` channel. Subscribers that fall behind
/// the queue size see their oldest events dropped (`RecvError::Lagged`);
/// publishing never blocks the resolver on a slow subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_SIZE)
    }
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // A send error just means there are currently no subscribers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Spawns the keepalive ticker; drop the returned handle to stop it.
    pub fn spawn_keepalive(&self) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                interval.tick().await;
                bus.publish(Event::Keepalive);
            }
        })
    }

    /// Spawns the periodic status snapshot publisher. Per the spec this
    /// only needs to run while someone is listening, but publishing to
    /// zero subscribers is a cheap no-op, so the loop runs unconditionally
    /// and relies on `publish` swallowing the no-receivers case. `snapshot`
    /// is async because computing it (e.g. reading the cache driver's size)
    /// goes through an async lock.
    pub fn spawn_status<F, Fut>(&self, snapshot: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StatusSnapshot> + Send,
    {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATUS_INTERVAL);
            loop {
                interval.tick().await;
                if bus.subscriber_count() == 0 {
                    continue;
                }
                bus.publish(Event::Status(snapshot().await));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_deliver_published_event_to_subscriber() {
        let bus = EventBus::default();
        let mut subscriber = bus.subscribe();
        bus.publish(Event::Drivers { kind: "cache".into() });

        let received = subscriber.recv().await.unwrap();
        assert!(matches!(received, Event::Drivers { kind } if kind == "cache"));
    }

    #[tokio::test]
    async fn should_not_error_publishing_with_no_subscribers() {
        let bus = EventBus::default();
        bus.publish(Event::Keepalive);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_lagged_error_not_block() {
        let bus = EventBus::with_capacity(2);
        let mut subscriber = bus.subscribe();
        for kind in ["a", "b", "c", "d"] {
            bus.publish(Event::Drivers { kind: kind.into() });
        }
        let result = subscriber.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
