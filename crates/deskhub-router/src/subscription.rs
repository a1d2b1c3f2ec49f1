//! Typed subscription tables
//!
//! Every event the registry and router publish has its own [`Topic`]. Each
//! `subscribe` returns a [`SubscriptionHandle`]; dropping the handle (or
//! calling [`SubscriptionHandle::unsubscribe`]) removes the listener, so
//! listeners cannot pile up across reconnect churn.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct TopicInner<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener<T>)>>,
}

/// A single event type and its listeners, called in subscription order
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

impl<T: 'static> Topic<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TopicInner {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Add a listener
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, Arc::new(listener)));

        let weak: Weak<TopicInner<T>> = Arc::downgrade(&self.inner);
        SubscriptionHandle {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.listeners.write().retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Call every listener with `value`.
    ///
    /// The listener list is copied first, so a listener may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.listeners.read().is_empty()
    }
}

impl<T: 'static> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its listener when dropped
#[must_use = "dropping the handle unsubscribes immediately; call detach() to keep the listener"]
pub struct SubscriptionHandle {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }

    /// Keep the listener for the lifetime of the topic
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("attached", &self.unsubscribe.is_some())
            .finish()
    }
}
