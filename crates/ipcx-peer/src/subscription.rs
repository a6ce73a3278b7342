//! Event listener registry and subscription handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::debug;

use crate::handler::HandleContext;

pub(crate) type EventListener = Arc<dyn Fn(&HandleContext, Vec<Value>) + Send + Sync>;

struct Entry {
    id: u64,
    once: bool,
    listener: EventListener,
}

/// Listeners by channel, in registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    by_channel: HashMap<String, Vec<Entry>>,
}

pub(crate) type SharedRegistry = Arc<Mutex<ListenerRegistry>>;

pub(crate) fn lock(registry: &Mutex<ListenerRegistry>) -> MutexGuard<'_, ListenerRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ListenerRegistry {
    pub(crate) fn add(&mut self, channel: &str, once: bool, listener: EventListener) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.by_channel
            .entry(channel.to_string())
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    pub(crate) fn remove(&mut self, channel: &str, id: u64) -> bool {
        let Some(entries) = self.by_channel.get_mut(channel) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_channel.remove(channel);
        }
        removed
    }

    /// Listeners to run for one event. One-shot entries are removed.
    pub(crate) fn take_for_dispatch(&mut self, channel: &str) -> Vec<EventListener> {
        let Some(entries) = self.by_channel.get_mut(channel) else {
            return Vec::new();
        };
        let listeners = entries.iter().map(|entry| entry.listener.clone()).collect();
        entries.retain(|entry| !entry.once);
        if entries.is_empty() {
            self.by_channel.remove(channel);
        }
        listeners
    }

    pub(crate) fn len(&self) -> usize {
        self.by_channel.values().map(Vec::len).sum()
    }

    pub(crate) fn count(&self, channel: &str) -> usize {
        self.by_channel.get(channel).map_or(0, Vec::len)
    }
}

/// Handle for one registered listener.
///
/// Dropping a subscription leaves the listener in place; call
/// [`Subscription::dispose`] (or [`crate::Endpoint::off`]) to remove it.
pub struct Subscription {
    channel: String,
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(channel: &str, id: u64, registry: &SharedRegistry) -> Self {
        Self {
            channel: channel.to_string(),
            id,
            registry: Arc::downgrade(registry),
            active: AtomicBool::new(true),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// False once disposed. A fired `once` listener may still read as active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the listener. Only the first call has an effect.
    pub fn dispose(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            let removed = lock(&registry).remove(&self.channel, self.id);
            debug!(channel = %self.channel, removed, "listener disposed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
