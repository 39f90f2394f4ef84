//! Per-channel state: kind, listener bindings and wire subscription status.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::listener::{ChannelEventListener, invoke_isolated, push_distinct, remove_first};
use crate::metrics::ClientMetrics;
use crate::protocol::ChannelEvent;

pub const PRIVATE_PREFIX: &str = "private-";
pub const PRESENCE_PREFIX: &str = "presence-";

/// Channel kind, implied by the name prefix.
///
/// All kinds share the subscription protocol; private and presence channels
/// add an authorization step before the subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
}

impl ChannelKind {
    pub fn from_name(name: &str) -> Self {
        if name.starts_with(PRESENCE_PREFIX) {
            Self::Presence
        } else if name.starts_with(PRIVATE_PREFIX) {
            Self::Private
        } else {
            Self::Public
        }
    }

    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Public)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
            Self::Presence => write!(f, "presence"),
        }
    }
}

#[derive(Default)]
struct Bindings {
    by_event: HashMap<String, Vec<Arc<dyn ChannelEventListener>>>,
    all_events: Vec<Arc<dyn ChannelEventListener>>,
}

/// A channel the application asked for.
///
/// Present in the registry = desired. [`Channel::is_subscribed`] = the
/// service acknowledged the most recent subscribe request.
pub struct Channel {
    name: String,
    kind: ChannelKind,
    bindings: Mutex<Bindings>,
    subscribed: AtomicBool,
    metrics: Arc<ClientMetrics>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(name: &str, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            name: name.to_string(),
            kind: ChannelKind::from_name(name),
            bindings: Mutex::new(Bindings::default()),
            subscribed: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether the service confirmed the subscription on the current socket.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub(crate) fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Release);
    }

    pub fn bind(&self, event: &str, listener: Arc<dyn ChannelEventListener>) {
        self.bindings
            .lock()
            .by_event
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove one registration of `listener` for `event`.
    pub fn unbind(&self, event: &str, listener: &Arc<dyn ChannelEventListener>) -> bool {
        let mut bindings = self.bindings.lock();
        let Some(list) = bindings.by_event.get_mut(event) else {
            return false;
        };
        let removed = remove_first(list, listener);
        if list.is_empty() {
            bindings.by_event.remove(event);
        }
        removed
    }

    /// Bind `listener` to every event on this channel.
    pub fn bind_all(&self, listener: Arc<dyn ChannelEventListener>) {
        self.bindings.lock().all_events.push(listener);
    }

    pub fn unbind_all(&self, listener: &Arc<dyn ChannelEventListener>) -> bool {
        remove_first(&mut self.bindings.lock().all_events, listener)
    }

    /// Number of registrations for `event`, not counting wildcard bindings.
    pub fn listener_count(&self, event: &str) -> usize {
        self.bindings
            .lock()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Run event listeners then wildcard listeners, each isolated.
    pub(crate) fn handle_event(&self, event: &ChannelEvent) {
        // Snapshot so listeners may bind/unbind from inside the callback.
        let listeners: Vec<Arc<dyn ChannelEventListener>> = {
            let bindings = self.bindings.lock();
            bindings
                .by_event
                .get(&event.event)
                .into_iter()
                .flatten()
                .chain(bindings.all_events.iter())
                .cloned()
                .collect()
        };

        trace!(
            channel = %self.name,
            event = %event.event,
            listeners = listeners.len(),
            "dispatching channel event"
        );

        for listener in listeners {
            if !invoke_isolated("channel event", || listener.on_event(event)) {
                self.metrics.listener_panicked();
            }
        }
        self.metrics.event_dispatched();
    }

    /// Notify each distinct bound listener that the subscription is live.
    pub(crate) fn handle_subscription_succeeded(&self) {
        let listeners = {
            let bindings = self.bindings.lock();
            let mut distinct: Vec<Arc<dyn ChannelEventListener>> = Vec::new();
            for listener in bindings.by_event.values().flatten() {
                push_distinct(&mut distinct, listener);
            }
            for listener in &bindings.all_events {
                push_distinct(&mut distinct, listener);
            }
            distinct
        };

        for listener in listeners {
            if !invoke_isolated("subscription succeeded", || {
                listener.on_subscription_succeeded(&self.name)
            }) {
                self.metrics.listener_panicked();
            }
        }
    }
}
