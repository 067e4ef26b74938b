//! Change notification hub.
//!
//! Collaborators that perform writes (favorites, schedule import) publish a
//! [`Topic`] after the write commits; views subscribe to the topics they render.
//! The hub never keeps a subscriber alive: owned callbacks live exactly as long
//! as their [`Subscription`] token, and weak callbacks only hold a
//! [`Weak`] reference to the subscriber.

use std::borrow::Cow;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Logical change channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The set of tracks changed (schedule import)
    Tracks,
    /// The set of events changed (schedule import)
    Events,
    /// A track was favorited or unfavorited
    FavoriteTracks,
    /// An event was favorited or unfavorited
    FavoriteEvents,
    Custom(Cow<'static, str>),
}

impl Topic {
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Topic::Custom(name.into())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Tracks => write!(f, "tracks"),
            Topic::Events => write!(f, "events"),
            Topic::FavoriteTracks => write!(f, "favorite_tracks"),
            Topic::FavoriteEvents => write!(f, "favorite_events"),
            Topic::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Returns false once the subscriber behind it is gone
type Callback = Arc<dyn Fn() -> bool + Send + Sync>;

struct Entry {
    id: u64,
    topic: Topic,
    callback: Callback,
    gate: Arc<Gate>,
}

/// Orders a subscription's calls against its cancellation: once closed, no
/// call starts, and closing waits for calls in flight on other threads.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    // One entry per call in flight
    running: Vec<ThreadId>,
}

/// Marks one call in flight until dropped (also on panic)
struct Running<'a>(&'a Gate);

impl Gate {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Option<Running<'_>> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        state.running.push(thread::current().id());
        Some(Running(self))
    }

    fn close(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        state.closed = true;
        // A callback cancelling itself must not wait for itself
        while state.running.iter().any(|id| *id != me) {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = self.0.state();
        if let Some(pos) = state.running.iter().position(|id| *id == me) {
            state.running.swap_remove(pos);
        }
        self.0.idle.notify_all();
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Insertion order is subscription order
    entries: Vec<Entry>,
}

impl Registry {
    fn insert(&mut self, topic: Topic, callback: Callback, gate: Arc<Gate>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            topic,
            callback,
            gate,
        });
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // A panicking callback never runs under the lock, so the data is intact
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observer registry keyed by [`Topic`]
#[derive(Clone, Default)]
pub struct NotificationHub {
    registry: Arc<Mutex<Registry>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic` until the returned token is dropped.
    ///
    /// Dropping the token from another thread blocks until a call already in
    /// progress there returns; no call starts afterwards. Dropping it from
    /// inside its own callback does not wait. Two callbacks that cancel each
    /// other's subscriptions from different threads at the same time deadlock.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(move || {
            callback();
            true
        });
        self.register(topic, callback)
    }

    /// Register a callback that only holds a weak reference to `subscriber`.
    ///
    /// Once `subscriber` is dropped the callback is never invoked again and the
    /// entry is pruned on the next publish, even if the token is still held.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_weak<S, F>(&self, topic: Topic, subscriber: &Arc<S>, callback: F) -> Subscription
    where
        S: Send + Sync + 'static,
        F: Fn(&S) + Send + Sync + 'static,
    {
        let subscriber: Weak<S> = Arc::downgrade(subscriber);
        let callback: Callback = Arc::new(move || match subscriber.upgrade() {
            Some(subscriber) => {
                callback(&subscriber);
                true
            }
            None => false,
        });
        self.register(topic, callback)
    }

    fn register(&self, topic: Topic, callback: Callback) -> Subscription {
        let gate = Arc::new(Gate::default());
        let id = lock(&self.registry).insert(topic.clone(), callback, gate.clone());
        debug!(topic = %topic, subscription = id, "Subscribed");
        Subscription {
            id,
            topic,
            gate,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every live callback for `topic`, in subscription order, on the
    /// calling thread. Returns the number of callbacks invoked.
    pub fn publish(&self, topic: &Topic) -> usize {
        let pending: Vec<(u64, Callback, Arc<Gate>)> = lock(&self.registry)
            .entries
            .iter()
            .filter(|entry| &entry.topic == topic)
            .map(|entry| (entry.id, entry.callback.clone(), entry.gate.clone()))
            .collect();

        let mut invoked = 0;
        let mut dead = Vec::new();
        for (id, callback, gate) in pending {
            // Cancelled since the snapshot, possibly by an earlier callback
            let Some(_running) = gate.enter() else {
                continue;
            };
            if callback() {
                invoked += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut registry = lock(&self.registry);
            for id in &dead {
                registry.remove(*id);
            }
        }

        debug!(topic = %topic, invoked, pruned = dead.len(), "Published");
        invoked
    }

    /// Number of registered subscriptions for `topic` (dead weak entries
    /// included until the next publish prunes them)
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        lock(&self.registry)
            .entries
            .iter()
            .filter(|entry| &entry.topic == topic)
            .count()
    }
}

/// Opaque registration token; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    topic: Topic,
    gate: Arc<Gate>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Explicitly unregister (same as dropping the token)
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.gate.close();
        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).remove(self.id) {
                debug!(topic = %self.topic, subscription = self.id, "Unsubscribed");
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
