//! Bounded FIFO queue backing each bus subscriber

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// A bounded FIFO with the two overflow behaviors the bus supports: evict the
/// oldest element, or make the producer wait for space up to a deadline.
///
/// Closing the queue stops consumption promptly: `pop` returns `None` even if
/// elements remain, and `len` reports how many were left behind so the caller
/// can observe (rather than silently lose) them.
pub(crate) struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    /// Signals consumers that an element arrived
    items: Notify,
    /// Signals waiting producers that space freed up
    space: Notify,
    closed: AtomicBool,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            items: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue, evicting the oldest element when full
    ///
    /// Returns `Ok(Some(evicted))` when an element was displaced,
    /// `Ok(None)` on a plain enqueue, and `Err(item)` if the queue is closed.
    pub fn push_drop_oldest(&self, item: T) -> Result<Option<T>, T> {
        if self.is_closed() {
            return Err(item);
        }
        let evicted = {
            let mut queue = self.inner.lock().unwrap();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(item);
            evicted
        };
        self.items.notify_one();
        Ok(evicted)
    }

    /// Enqueue, waiting up to `timeout` for space when full
    ///
    /// Returns the item back if the deadline passes or the queue closes.
    pub async fn push_wait(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        loop {
            if self.is_closed() {
                return Err(item);
            }
            {
                let mut queue = self.inner.lock().unwrap();
                if queue.len() < self.capacity {
                    queue.push_back(item);
                    drop(queue);
                    self.items.notify_one();
                    return Ok(());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(item);
            }
            let notified = self.space.notified();
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Err(item);
            }
        }
    }

    /// Dequeue the next element, waiting for one to arrive
    ///
    /// Returns `None` once the queue is closed, without draining leftovers.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.items.notified();
            if self.is_closed() {
                return None;
            }
            if let Some(item) = self.inner.lock().unwrap().pop_front() {
                self.space.notify_one();
                return Some(item);
            }
            notified.await;
        }
    }

    /// Stop the queue: wakes all waiting producers and consumers
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.items.notify_waiters();
        self.space.notify_waiters();
        // notify_waiters does not store a permit; a consumer between its
        // closed-check and its await would sleep forever without these
        self.items.notify_one();
        self.space.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop without waiting, ignoring the closed flag; used by tests and by
    /// observers inspecting what a cancelled subscriber left behind
    #[cfg(test)]
    pub fn try_pop(&self) -> Option<T> {
        let item = self.inner.lock().unwrap().pop_front();
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }
}
