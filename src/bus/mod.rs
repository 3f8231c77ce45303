//! Event bus: fans derived events out to independent subscribers
//!
//! Every subscriber owns a bounded queue and a dispatch task draining it. A
//! slow subscriber never blocks the others; when its queue fills, the bus
//! applies the configured backpressure policy (bounded wait or drop-oldest)
//! and counts what it sheds. Handler panics are not caught, but handler
//! errors are: a failing handler is logged and counted, and neither the other
//! subscribers nor later events are affected.
//!
//! The bus is an explicit value passed to whoever needs it; there is no
//! process-wide instance.

mod queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{DerivedEvent, EventKind};

use queue::BoundedQueue;

/// What `publish` does when a subscriber's queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait up to the given timeout for space, then drop the incoming event
    Wait { timeout: Duration },
    /// Evict the oldest queued event to make room for the new one
    DropOldest,
}

/// Per-bus configuration; the policy applies to every subscriber
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Queue capacity per subscriber
    pub capacity: usize,
    pub policy: BackpressurePolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            policy: BackpressurePolicy::Wait {
                timeout: Duration::from_secs(5),
            },
        }
    }
}

/// Snapshot of bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted by `publish`
    pub published: u64,
    /// Handler invocations that completed successfully
    pub delivered: u64,
    /// Events shed by backpressure (evicted or timed out)
    pub dropped: u64,
    /// Handler invocations that returned an error
    pub handler_failures: u64,
}

#[derive(Default)]
struct StatsCells {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

impl StatsCells {
    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

type Handler = Arc<dyn Fn(Arc<DerivedEvent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Subscriber {
    kind: Option<EventKind>,
    agent_id: Option<String>,
    queue: Arc<BoundedQueue<Arc<DerivedEvent>>>,
    /// Whether the dispatch task currently has a dequeued event in a handler
    busy: Arc<AtomicBool>,
}

impl Subscriber {
    fn matches(&self, event: &DerivedEvent) -> bool {
        if let Some(kind) = self.kind {
            if event.kind() != kind {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if event.agent_id() != agent_id {
                return false;
            }
        }
        true
    }
}

struct BusInner {
    subscribers: RwLock<HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
    config: BusConfig,
    stats: StatsCells,
}

/// Pub/sub fan-out with bounded per-subscriber queues
///
/// Cheap to clone; clones share the same subscriber set and counters.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    /// Create a bus with the given queue configuration
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
                stats: StatsCells::default(),
            }),
        }
    }

    /// Subscribe to one event kind
    pub async fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(Arc<DerivedEvent>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_filtered(Some(kind), None, handler).await
    }

    /// Subscribe to every event kind
    pub async fn subscribe_all<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(Arc<DerivedEvent>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_filtered(None, None, handler).await
    }

    /// Subscribe with optional kind and agent filters
    ///
    /// `kind: None` matches every kind; `agent_id: Some(..)` restricts
    /// delivery to that agent's events.
    pub async fn subscribe_filtered<F, Fut>(
        &self,
        kind: Option<EventKind>,
        agent_id: Option<String>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(Arc<DerivedEvent>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(handler(event))
        });
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(BoundedQueue::new(self.inner.config.capacity));
        let busy = Arc::new(AtomicBool::new(false));

        let subscriber = Arc::new(Subscriber {
            kind,
            agent_id,
            queue: queue.clone(),
            busy: busy.clone(),
        });
        self.inner
            .subscribers
            .write()
            .await
            .insert(id, subscriber);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(event) = queue.pop().await {
                busy.store(true, Ordering::Release);
                match handler(event).await {
                    Ok(()) => {
                        inner.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        inner.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(subscription = id, error = %e, "event handler failed");
                    }
                }
                busy.store(false, Ordering::Release);
            }
            let left_behind = queue.len();
            if left_behind > 0 {
                debug!(
                    subscription = id,
                    left_behind, "subscription cancelled with events still queued"
                );
            }
        });

        Subscription {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Publish one event to every matching subscriber
    ///
    /// Never fails: backpressure is absorbed by the configured policy and
    /// recorded in the stats instead of surfacing as an error.
    pub async fn publish(&self, event: DerivedEvent) {
        let event = Arc::new(event);
        self.inner.stats.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<Subscriber>> = {
            let subscribers = self.inner.subscribers.read().await;
            subscribers
                .values()
                .filter(|s| s.matches(&event))
                .cloned()
                .collect()
        };

        for subscriber in targets {
            match self.inner.config.policy {
                BackpressurePolicy::DropOldest => {
                    match subscriber.queue.push_drop_oldest(event.clone()) {
                        Ok(Some(_evicted)) => {
                            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) => {}
                        // Queue closed under us: subscriber is gone
                        Err(_) => {}
                    }
                }
                BackpressurePolicy::Wait { timeout } => {
                    if subscriber
                        .queue
                        .push_wait(event.clone(), timeout)
                        .await
                        .is_err()
                        && !subscriber.queue.is_closed()
                    {
                        self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("subscriber queue full past timeout, event dropped");
                    }
                }
            }
        }
    }

    /// Current counter snapshot
    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Wait until every queue is empty and no handler is running
    ///
    /// Returns `false` if the deadline passes first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = {
                let subscribers = self.inner.subscribers.read().await;
                subscribers
                    .values()
                    .all(|s| s.queue.is_empty() && !s.busy.load(Ordering::Acquire))
            };
            if idle {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Cancel every subscription
    pub async fn shutdown(&self) {
        let mut subscribers = self.inner.subscribers.write().await;
        for (_, subscriber) in subscribers.drain() {
            subscriber.queue.close();
        }
    }
}

/// Handle returned by the subscribe methods
///
/// Dropping the handle keeps the subscription alive; cancellation is always
/// explicit so the caller observes it.
pub struct Subscription {
    id: u64,
    inner: Arc<BusInner>,
}

impl Subscription {
    /// Cancel delivery promptly
    ///
    /// Returns how many queued events had not been handled; the in-flight
    /// handler call, if any, still completes.
    pub async fn unsubscribe(self) -> usize {
        let subscriber = self.inner.subscribers.write().await.remove(&self.id);
        match subscriber {
            Some(subscriber) => {
                subscriber.queue.close();
                subscriber.queue.len()
            }
            None => 0,
        }
    }

    /// Identifier of this subscription, for logs
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentPhase, StateEvent};
    use std::sync::Mutex as StdMutex;

    fn state_event(agent_id: &str, n: i64) -> DerivedEvent {
        DerivedEvent::State(StateEvent {
            agent_id: agent_id.into(),
            state: if n % 2 == 0 {
                AgentPhase::Thinking
            } else {
                AgentPhase::Responding
            },
            timestamp: n,
            cause_event_id: format!("evt-{}-{}", agent_id, n),
        })
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers() {
        let bus = EventBus::default();
        let seen: Arc<StdMutex<Vec<i64>>> = Arc::new(StdMutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let sub = bus
            .subscribe(EventKind::State, move |event| {
                let seen = seen_clone.clone();
                async move {
                    if let DerivedEvent::State(e) = event.as_ref() {
                        seen.lock().unwrap().push(e.timestamp);
                    }
                    Ok(())
                }
            })
            .await;

        for n in 0..5 {
            bus.publish(state_event("a1", n)).await;
        }
        assert!(bus.drain(Duration::from_secs(1)).await);

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        let stats = bus.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.dropped, 0);

        sub.unsubscribe().await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn handler_failure_is_isolated() {
        let bus = EventBus::default();
        let good: Arc<StdMutex<u32>> = Arc::new(StdMutex::new(0));

        let _bad = bus
            .subscribe_all(|_| async { Err(anyhow::anyhow!("handler broke")) })
            .await;
        let good_clone = good.clone();
        let _good = bus
            .subscribe_all(move |_| {
                let good = good_clone.clone();
                async move {
                    *good.lock().unwrap() += 1;
                    Ok(())
                }
            })
            .await;

        bus.publish(state_event("a1", 1)).await;
        bus.publish(state_event("a1", 2)).await;
        assert!(bus.drain(Duration::from_secs(1)).await);

        assert_eq!(*good.lock().unwrap(), 2);
        let stats = bus.stats();
        assert_eq!(stats.handler_failures, 2);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn agent_filter_restricts_delivery() {
        let bus = EventBus::default();
        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = bus
            .subscribe_filtered(None, Some("a1".into()), move |event| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().unwrap().push(event.agent_id().to_string());
                    Ok(())
                }
            })
            .await;

        bus.publish(state_event("a1", 1)).await;
        bus.publish(state_event("a2", 2)).await;
        bus.publish(state_event("a1", 3)).await;
        assert!(bus.drain(Duration::from_secs(1)).await);

        assert_eq!(*seen.lock().unwrap(), vec!["a1", "a1"]);
    }

    #[tokio::test]
    async fn unsubscribe_reports_undelivered_events() {
        let bus = EventBus::new(BusConfig {
            capacity: 16,
            policy: BackpressurePolicy::DropOldest,
        });

        // A handler that blocks forever after the first event
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate_clone = gate.clone();
        let sub = bus
            .subscribe_all(move |_| {
                let gate = gate_clone.clone();
                async move {
                    gate.notified().await;
                    Ok(())
                }
            })
            .await;

        for n in 0..5 {
            bus.publish(state_event("a1", n)).await;
        }
        // Give the dispatcher time to dequeue the first event into the handler
        tokio::time::sleep(Duration::from_millis(20)).await;

        let undelivered = sub.unsubscribe().await;
        assert_eq!(undelivered, 4);
    }

    #[tokio::test]
    async fn wait_policy_drops_after_timeout() {
        let bus = EventBus::new(BusConfig {
            capacity: 1,
            policy: BackpressurePolicy::Wait {
                timeout: Duration::from_millis(10),
            },
        });

        // Subscriber that never makes progress
        let _sub = bus
            .subscribe_all(|_| async {
                futures::future::pending::<()>().await;
                Ok(())
            })
            .await;

        for n in 0..4 {
            bus.publish(state_event("a1", n)).await;
        }
        let stats = bus.stats();
        assert_eq!(stats.published, 4);
        // First event went into the handler, second sat in the queue, the
        // rest timed out waiting for space
        assert!(stats.dropped >= 2, "dropped = {}", stats.dropped);
    }
}
