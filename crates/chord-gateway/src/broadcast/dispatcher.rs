//! Event dispatcher
//!
//! Routes decoded dispatch frames to one-shot waiters and publishes every
//! event on the general broadcast stream.

use super::waiter::{Resolution, WaitFor, Waiter};
use crate::events::GatewayEvent;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

/// Default capacity of the general event stream
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Event dispatcher shared by the reader loop and every `wait_for` caller
#[derive(Debug)]
pub struct EventDispatcher {
    /// Waiters keyed by upper-case event name
    waiters: DashMap<String, Vec<Waiter>>,
    /// Id source for waiters
    next_id: AtomicU64,
    /// General event stream
    events: broadcast::Sender<GatewayEvent>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(buffer: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(buffer.max(1));
        Arc::new(Self {
            waiters: DashMap::new(),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    /// Subscribe to the general event stream
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Publish a lifecycle event
    pub fn publish(&self, event: GatewayEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Deliver one dispatch frame
    ///
    /// Matching waiters are resolved first, then the frame goes to the
    /// general stream regardless. Returns the number of waiters fulfilled.
    pub fn dispatch(&self, name: &str, sequence: Option<u64>, data: Value) -> usize {
        let fulfilled = self.resolve_waiters(name, &data);

        if fulfilled > 0 {
            tracing::debug!(event = name, fulfilled, "Resolved waiters");
        }

        self.publish(GatewayEvent::Dispatch {
            name: name.to_string(),
            sequence,
            data: Arc::new(data),
        });

        fulfilled
    }

    fn resolve_waiters(&self, name: &str, data: &Value) -> usize {
        let key = name.to_ascii_uppercase();
        let mut fulfilled = 0;

        // Taken out of the map so predicates and transforms run unlocked
        let Some((_, mut waiters)) = self.waiters.remove(&key) else {
            return 0;
        };
        waiters.retain_mut(|waiter| match waiter.offer(data) {
            Resolution::Pending => true,
            Resolution::Fulfilled => {
                fulfilled += 1;
                false
            }
            Resolution::Abandoned => false,
        });

        if !waiters.is_empty() {
            // Waiters registered meanwhile stay behind the older ones
            let mut entry = self.waiters.entry(key).or_default();
            let newer = std::mem::replace(entry.value_mut(), waiters);
            entry.value_mut().extend(newer);
        }

        fulfilled
    }

    /// Wait for the next `event` whose payload satisfies `predicate`
    ///
    /// The returned handle resolves to `transform(payload)` for the first
    /// match. Event names are case-insensitive. `predicate` and `transform`
    /// run on the reader task without any registry lock held, so they may
    /// register or count waiters themselves.
    pub fn wait_for<T, P, F>(self: &Arc<Self>, event: &str, predicate: P, transform: F) -> WaitFor<T>
    where
        T: Send + 'static,
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: FnOnce(&Value) -> T + Send + Sync + 'static,
    {
        let key = event.to_ascii_uppercase();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.waiters
            .entry(key.clone())
            .or_default()
            .push(Waiter::new(id, predicate, transform, tx));

        tracing::trace!(event = %key, waiter_id = id, "Registered waiter");
        WaitFor::new(rx, Arc::downgrade(self), key, id)
    }

    /// Wait for the next `event` matching `predicate`, yielding the raw payload
    pub fn wait_for_raw<P>(self: &Arc<Self>, event: &str, predicate: P) -> WaitFor<Value>
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.wait_for(event, predicate, Value::clone)
    }

    pub(crate) fn remove_waiter(&self, event: &str, id: u64) {
        if let Some(mut entry) = self.waiters.get_mut(event) {
            entry.retain(|waiter| waiter.id != id);
        }
        self.waiters.remove_if(event, |_, waiters| waiters.is_empty());
    }

    /// Number of pending waiters for `event`
    pub fn waiter_count(&self, event: &str) -> usize {
        self.waiters
            .get(&event.to_ascii_uppercase())
            .map_or(0, |entry| entry.len())
    }

    /// Drop every pending waiter; their handles resolve to `WaitError::Closed`
    pub fn clear_waiters(&self) {
        self.waiters.clear();
    }
}
