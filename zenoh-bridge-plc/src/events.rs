//! Event publisher: fans bridge events out to independent subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks; when a
//! subscriber falls behind, its oldest events are dropped and counted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Notify;
use tracing::{debug, warn};

use plclink_common::BridgeEvent;

#[derive(Debug, Default)]
struct SubscriberQueue {
    events: Mutex<VecDeque<BridgeEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn push(&self, event: BridgeEvent, capacity: usize) -> bool {
        let overflowed = {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            let overflowed = events.len() >= capacity;
            if overflowed {
                events.pop_front();
            }
            events.push_back(event);
            overflowed
        };

        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        overflowed
    }

    fn pop(&self) -> Option<BridgeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct BusInner {
    subscribers: Mutex<HashMap<u64, Arc<SubscriberQueue>>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
    published: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) -> Option<Arc<SubscriberQueue>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

/// Per-connection event fan-out.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer up to `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// A subscription taken after [`close`](Self::close) ends immediately.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::default());

        {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closed.load(Ordering::Acquire) {
                queue.close();
            } else {
                subscribers.insert(id, queue.clone());
            }
        }

        Subscription {
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber; it still drains what was already queued.
    pub fn unsubscribe(&self, id: u64) -> bool {
        match self.inner.remove(id) {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }

    /// Queue an event for every subscriber. Returns how many received it.
    pub fn publish(&self, event: impl Into<BridgeEvent>) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            return 0;
        }

        let event = event.into();
        let subscribers: Vec<(u64, Arc<SubscriberQueue>)> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, q)| (*id, q.clone()))
            .collect();

        for (id, queue) in &subscribers {
            if queue.push(event.clone(), self.inner.capacity) {
                let dropped = queue.dropped.load(Ordering::Relaxed);
                if dropped.is_power_of_two() {
                    warn!(subscriber = id, dropped, "Subscriber lagging, dropping oldest events");
                }
            }
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        subscribers.len()
    }

    /// Stop accepting events and end every subscription once drained.
    pub fn close(&self) {
        let subscribers: Vec<Arc<SubscriberQueue>> = {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            subscribers.drain().map(|(_, q)| q).collect()
        };

        debug!(subscribers = subscribers.len(), "Closing event bus");
        for queue in subscribers {
            queue.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Events published since creation.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// Receiving end of one subscriber's queue.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; `None` once the bus is closed and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return self.queue.pop();
            }
            self.queue.notify.notified().await;
        }
    }

    /// Take the next event without waiting.
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.queue.pop()
    }

    /// Events dropped because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
