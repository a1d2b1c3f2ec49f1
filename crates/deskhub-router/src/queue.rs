//! Drop-oldest bounded queue
//!
//! One queue per destination (app inbox, client outbound pipe), drained by
//! exactly one task. When a producer pushes into a full queue the oldest
//! entry is discarded so one slow consumer never stalls the router.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::warn;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// Single-consumer FIFO with a hard capacity
pub struct BoundedQueue<T> {
    label: String,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            label: label.into(),
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue an item.
    ///
    /// Returns the evicted oldest item when the queue was full, or the item
    /// itself when the queue is closed.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Some(item);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.dropped += 1;
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            evicted
        };

        if evicted.is_some() {
            warn!(
                "Queue {} full ({} entries), dropped oldest",
                self.label, self.capacity
            );
        }
        self.notify.notify_one();
        evicted
    }

    /// Wait for the next item; `None` once closed and drained
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting items; queued items are still delivered
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("label", &self.label)
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("dropped", &state.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new("test", 8);
        for i in 0..5 {
            assert!(queue.push(i).is_none());
        }
        for i in 0..5 {
            assert_eq!(queue.pop().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let queue = BoundedQueue::new("test", 3);
        for i in 0..3 {
            queue.push(i);
        }
        assert_eq!(queue.push(3), Some(0));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().await, Some(1));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = BoundedQueue::new("test", 4);
        queue.push("a");
        queue.close();
        assert_eq!(queue.push("b"), Some("b"));
        assert_eq!(queue.pop().await, Some("a"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(BoundedQueue::new("test", 4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(7u32);
        assert_eq!(consumer.await.unwrap(), Some(7));
    }
}
