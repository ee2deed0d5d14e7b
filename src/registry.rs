//! Fixed-capacity subscription registry with wildcard dispatch.
//!
//! The registry binds topic filters to dispatch callbacks. It is sized
//! once at construction and never grows: constrained targets budget their
//! memory up front, and a full table is an application error, not a cue to
//! reallocate.
//!
//! The kernel itself touches the registry in exactly two ways: it
//! enumerates live filters to rebuild subscribe batches after a
//! non-resumed session, and it removes filters the broker refused. The
//! protocol engine uses [`SubscriptionHandle::dispatch`] to fan incoming
//! publishes out to the registered callbacks; a publish no callback claims
//! goes to the configurable fallback sink instead (by default it is logged
//! as unsolicited).
//!
//! Slot order is stable: snapshots enumerate entries in the order they
//! were added, which is also the order acknowledgement codes come back in
//! a subscribe batch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::warn;

/// An incoming application message handed to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEvent {
    /// Concrete topic the message arrived on (no wildcards).
    pub topic: String,

    /// Raw payload bytes; interpretation belongs to the callback.
    pub payload: Vec<u8>,
}

/// Callback invoked for every matching incoming publish.
pub type PublishHandler = Box<dyn FnMut(&PublishEvent) + Send>;

/// Sink for publishes that matched no registered filter.
pub type FallbackSink = Box<dyn FnMut(&PublishEvent) + Send>;

/// Registry misuse reported to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot is occupied.
    #[error("subscription registry full (capacity {0})")]
    Full(usize),

    /// Empty filters denote free slots and cannot be registered.
    #[error("empty topic filter")]
    EmptyFilter,
}

struct SubscriptionEntry {
    filter: String,
    handler: PublishHandler,
}

/// The subscription table. Owned once, for the life of the supervisor.
pub struct SubscriptionStore {
    slots: Vec<Option<SubscriptionEntry>>,
    fallback: FallbackSink,
    rejected_total: u64,
}

impl SubscriptionStore {
    /// Creates an empty table with a fixed number of slots.
    ///
    /// The default fallback sink logs unmatched publishes at WARN.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            fallback: Box::new(|event: &PublishEvent| {
                warn!(topic = %event.topic, "received an unsolicited publish");
            }),
            rejected_total: 0,
        }
    }

    /// Replaces the fallback sink for unmatched publishes.
    pub fn set_fallback(&mut self, sink: FallbackSink) {
        self.fallback = sink;
    }

    /// Registers a filter in the first free slot.
    ///
    /// Duplicate filters are allowed; each registered callback fires on a
    /// matching publish.
    pub fn add(
        &mut self,
        filter: impl Into<String>,
        handler: PublishHandler,
    ) -> Result<(), RegistryError> {
        let filter = filter.into();
        if filter.is_empty() {
            return Err(RegistryError::EmptyFilter);
        }
        let capacity = self.slots.len();
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(SubscriptionEntry { filter, handler });
                Ok(())
            }
            None => Err(RegistryError::Full(capacity)),
        }
    }

    /// Removes every slot whose filter equals `filter` exactly.
    ///
    /// Returns whether anything was removed. Callback bindings are
    /// dropped, never rewritten.
    pub fn remove(&mut self, filter: &str) -> bool {
        let mut removed = false;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|entry| entry.filter == filter) {
                *slot = None;
                removed = true;
            }
        }
        removed
    }

    /// Live filters in slot order.
    pub fn snapshot(&self) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| entry.filter.clone())
            .collect()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// True when no filter is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots, free or occupied.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fans a publish out to every matching callback.
    ///
    /// Returns `true` if at least one callback claimed it; otherwise the
    /// fallback sink ran.
    pub fn dispatch(&mut self, event: &PublishEvent) -> bool {
        let mut handled = false;
        for entry in self.slots.iter_mut().flatten() {
            if filter_matches(&entry.filter, &event.topic) {
                (entry.handler)(event);
                handled = true;
            }
        }
        if !handled {
            (self.fallback)(event);
        }
        handled
    }

    fn record_rejection(&mut self) {
        self.rejected_total += 1;
    }

    fn rejected_total(&self) -> u64 {
        self.rejected_total
    }
}

/// Cloneable handle to the shared subscription table.
///
/// Mutation happens on a single execution context (the supervisor task and
/// the engine's completion path run on the same task), so the mutex only
/// satisfies the compiler; it is never contended. A poisoned lock is
/// recovered rather than propagated, since the table holds no invariants a
/// panicking callback could break.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<Mutex<SubscriptionStore>>,
}

impl SubscriptionHandle {
    /// Wraps a store for sharing between the supervisor, the engine, and
    /// completion continuations.
    pub fn new(store: SubscriptionStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Shorthand for a handle over a fresh table of the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(SubscriptionStore::with_capacity(capacity))
    }

    fn lock(&self) -> MutexGuard<'_, SubscriptionStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`SubscriptionStore::add`].
    pub fn add(
        &self,
        filter: impl Into<String>,
        handler: PublishHandler,
    ) -> Result<(), RegistryError> {
        self.lock().add(filter, handler)
    }

    /// See [`SubscriptionStore::remove`]. Rejections recorded through the
    /// resubscription path also bump the loss counter.
    pub fn remove(&self, filter: &str) -> bool {
        self.lock().remove(filter)
    }

    /// See [`SubscriptionStore::snapshot`].
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().snapshot()
    }

    /// See [`SubscriptionStore::dispatch`].
    pub fn dispatch(&self, event: &PublishEvent) -> bool {
        self.lock().dispatch(event)
    }

    /// See [`SubscriptionStore::set_fallback`].
    pub fn set_fallback(&self, sink: FallbackSink) {
        self.lock().set_fallback(sink)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes a filter the broker refused and records the loss.
    ///
    /// Used by the resubscription coordinator's completion continuation;
    /// the supervisor watches the counter to apply the configurable
    /// abort-on-loss policy.
    pub fn prune_rejected(&self, filter: &str) -> bool {
        let mut store = self.lock();
        let removed = store.remove(filter);
        store.record_rejection();
        removed
    }

    /// Running count of filters the broker has refused.
    pub fn rejected_total(&self) -> u64 {
        self.lock().rejected_total()
    }
}

/// MQTT topic-filter matching.
///
/// `+` matches exactly one level, `#` matches the remainder of the topic
/// (including zero levels) and is only meaningful as the final level.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(level), Some(name)) if level == name => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
