//! Event routing and ordered listener delivery.
//!
//! Work for listeners is queued under the connection lock in the order the
//! state changes and frames happened, then drained outside the lock. One
//! thread drains at a time and every caller returns only after its own work
//! was delivered. A re-entrant call from inside a listener just enqueues and
//! leaves the draining to the drain already running on that thread.

use std::cell::Cell;
use std::sync::Arc;

use tracing::debug;

use crate::channel::Channel;
use crate::connection::Shared;
use crate::error::TransportError;
use crate::listener::{ConnectionEventListener, invoke_isolated};
use crate::metrics::ClientMetrics;
use crate::protocol::ChannelEvent;
use crate::registry::ChannelTable;
use crate::state::ConnectionStateChange;

/// One unit of listener work.
pub(crate) enum Delivery {
    StateChange {
        change: ConnectionStateChange,
        listeners: Vec<Arc<dyn ConnectionEventListener>>,
    },
    Error {
        message: String,
        code: Option<i64>,
        cause: Option<TransportError>,
        listeners: Vec<Arc<dyn ConnectionEventListener>>,
    },
    Event {
        channel: Arc<Channel>,
        event: ChannelEvent,
    },
    SubscriptionSucceeded {
        channel: Arc<Channel>,
    },
}

impl Delivery {
    fn deliver(self, metrics: &ClientMetrics) {
        match self {
            Delivery::StateChange { change, listeners } => {
                for listener in listeners {
                    if !invoke_isolated("connection state change", || {
                        listener.on_connection_state_change(&change)
                    }) {
                        metrics.listener_panicked();
                    }
                }
            }
            Delivery::Error {
                message,
                code,
                cause,
                listeners,
            } => {
                for listener in listeners {
                    if !invoke_isolated("connection error", || {
                        listener.on_error(&message, code, cause.as_ref())
                    }) {
                        metrics.listener_panicked();
                    }
                }
            }
            Delivery::Event { channel, event } => channel.handle_event(&event),
            Delivery::SubscriptionSucceeded { channel } => channel.handle_subscription_succeeded(),
        }
    }
}

/// Route a channel event to its registered channel.
///
/// Events for channels that are not registered (typically an unsubscribe that
/// raced an in-flight event) are dropped without error.
pub(crate) fn route(
    channels: &ChannelTable,
    metrics: &ClientMetrics,
    event: ChannelEvent,
) -> Option<Delivery> {
    match channels.get(&event.channel) {
        Some(channel) => Some(Delivery::Event {
            channel: channel.clone(),
            event,
        }),
        None => {
            metrics.event_dropped();
            debug!(
                channel = %event.channel,
                event = %event.event,
                "dropping event for channel not in registry"
            );
            None
        }
    }
}

/// Clears the draining flag even if a delivery unwinds.
struct Draining<'a>(&'a Cell<bool>);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Shared {
    /// Deliver queued listener work before returning.
    ///
    /// A caller on another thread waits for the current drain to finish and
    /// then drains whatever is left, its own work included. A nested call
    /// from a listener returns at once; the drain it is nested in picks its
    /// work up.
    pub(crate) fn flush(&self) {
        let gate = self.delivery_gate.lock();
        if gate.replace(true) {
            return;
        }
        let _draining = Draining(&gate);

        loop {
            let next = self.core.lock().deliveries.pop_front();
            match next {
                Some(delivery) => delivery.deliver(&self.metrics),
                None => break,
            }
        }
    }
}
