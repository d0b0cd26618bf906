//! Subscription registry with scoped, `Drop`-released handles.
//!
//! Consumers register a callback object and receive a [`SubscriptionHandle`];
//! dropping the handle releases the registration, so teardown can never leak
//! a listener. The registry is an injected value, never ambient global state.

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

/// A component implements this to receive pushed updates of type `T`.
pub trait Subscriber<T>: Send {
    fn on_update(&mut self, update: &T);
}

struct SubscriberEntry<T> {
    id: u64,
    subscriber: Arc<Mutex<dyn Subscriber<T>>>,
}

struct Inner<T> {
    entries: Vec<SubscriberEntry<T>>,
    next_id: u64,
}

/// A set of subscribers interested in updates of type `T`.
pub struct SubscriberRegistry<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SubscriberRegistry<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { entries: Vec::new(), next_id: 0 })),
        }
    }

    /// Registers a subscriber, returning a handle that unregisters it on drop.
    pub fn subscribe(&self, subscriber: Arc<Mutex<dyn Subscriber<T>>>) -> SubscriptionHandle<T> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(SubscriberEntry { id, subscriber });
        SubscriptionHandle {
            registry: Arc::downgrade(&self.inner),
            id,
            released: false,
        }
    }

    /// Delivers `update` to every live subscriber.
    ///
    /// Callbacks run outside the registry lock, so a subscriber may
    /// subscribe or unsubscribe others from within its callback.
    pub fn notify(&self, update: &T) {
        let to_notify: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.subscriber))
            .collect();
        for subscriber in to_notify {
            match subscriber.lock() {
                Ok(mut sub) => sub.on_update(update),
                Err(_) => warn!("skipping poisoned subscriber during notify"),
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

/// A live registration in a [`SubscriberRegistry`].
///
/// Dropping the handle releases the registration.
pub struct SubscriptionHandle<T> {
    registry: Weak<Mutex<Inner<T>>>,
    id: u64,
    released: bool,
}

impl<T> SubscriptionHandle<T> {
    /// Releases the registration early, before the handle is dropped.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().unwrap().entries.retain(|entry| entry.id != self.id);
        }
    }
}

impl<T> Drop for SubscriptionHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}
