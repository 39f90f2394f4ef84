//! Connection: the lifecycle state machine over a [`Transport`].
//!
//! One lock guards the lifecycle state, the transport handle and the channel
//! table together, so subscription changes and transitions driven by the
//! transport are serialized. Listener callbacks never run under that lock.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::auth::Authorizer;
use crate::config::ReconnectConfig;
use crate::dispatcher::{Delivery, route};
use crate::error::TransportError;
use crate::listener::{ConnectionEventListener, push_distinct, remove_first};
use crate::metrics::ClientMetrics;
use crate::protocol::{self, InboundMessage, OutboundMessage};
use crate::registry::{AuthJob, ChannelTable};
use crate::state::{ConnectionState, ConnectionStateChange};
use crate::transport::{Transport, TransportEvents, TransportHandle};

/// Lifecycle half of the shared core.
pub(crate) struct Link {
    pub(crate) state: ConnectionState,
    pub(crate) handle: Option<TransportHandle>,
    /// Bumped on every open and every loss; inbound events carry the epoch
    /// they were opened with.
    pub(crate) epoch: u64,
    pub(crate) socket_id: Option<String>,
    /// Retry attempts made in the current outage.
    attempts: u32,
    retry: Option<CancellationToken>,
    listeners: HashMap<ConnectionState, Vec<Arc<dyn ConnectionEventListener>>>,
}

impl Link {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            handle: None,
            epoch: 0,
            socket_id: None,
            attempts: 0,
            retry: None,
            listeners: HashMap::new(),
        }
    }

    /// State-specific listeners first, then `All`, each in binding order.
    fn listeners_for(&self, state: ConnectionState) -> Vec<Arc<dyn ConnectionEventListener>> {
        let specific = self.listeners.get(&state).into_iter().flatten();
        let all = self.listeners.get(&ConnectionState::All).into_iter().flatten();
        specific.chain(all).cloned().collect()
    }

    fn distinct_listeners(&self) -> Vec<Arc<dyn ConnectionEventListener>> {
        let mut distinct = Vec::new();
        for listener in self.listeners.values().flatten() {
            push_distinct(&mut distinct, listener);
        }
        distinct
    }

    fn cancel_retry(&mut self) {
        if let Some(token) = self.retry.take() {
            token.cancel();
        }
    }
}

/// Everything the connection and the registry mutate, behind one lock.
pub(crate) struct Core {
    pub(crate) link: Link,
    pub(crate) channels: ChannelTable,
    pub(crate) deliveries: VecDeque<Delivery>,
}

impl Core {
    /// Move to `next`, queueing exactly one notification for the transition.
    pub(crate) fn transition(&mut self, next: ConnectionState) -> bool {
        let previous = self.link.state;
        if !previous.can_transition_to(next) {
            warn!(from = %previous, to = %next, "ignoring illegal connection transition");
            return false;
        }
        self.link.state = next;
        info!(from = %previous, to = %next, "connection state changed");

        let listeners = self.link.listeners_for(next);
        if !listeners.is_empty() {
            self.deliveries.push_back(Delivery::StateChange {
                change: ConnectionStateChange::new(previous, next),
                listeners,
            });
        }
        true
    }

    fn report_error(&mut self, message: String, code: Option<i64>, cause: Option<TransportError>) {
        let listeners = self.link.distinct_listeners();
        if !listeners.is_empty() {
            self.deliveries.push_back(Delivery::Error {
                message,
                code,
                cause,
                listeners,
            });
        }
    }
}

pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) metrics: Arc<ClientMetrics>,
    pub(crate) core: Mutex<Core>,
    /// Held by the thread draining `deliveries`; the flag marks an active
    /// drain so a nested call from a listener only enqueues.
    pub(crate) delivery_gate: ReentrantMutex<Cell<bool>>,
}

impl Shared {
    fn connect(self: &Arc<Self>) {
        {
            let mut core = self.core.lock();
            match core.link.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(state = %core.link.state, "connect ignored");
                }
                ConnectionState::Reconnecting => {
                    // Skip the remaining backoff; the state already reflects the outage.
                    core.link.cancel_retry();
                    self.close_socket(&mut core);
                    self.open_socket(&mut core);
                }
                ConnectionState::Disconnected | ConnectionState::All => {
                    core.link.attempts = 0;
                    core.transition(ConnectionState::Connecting);
                    self.open_socket(&mut core);
                }
            }
        }
        self.flush();
    }

    fn disconnect(self: &Arc<Self>) {
        {
            let mut core = self.core.lock();
            if core.link.state == ConnectionState::Disconnected {
                debug!("disconnect ignored, already disconnected");
            } else {
                // Cancelled under the lock: a retry task that wakes up later
                // sees the token and the new state and does nothing.
                core.link.cancel_retry();
                self.close_socket(&mut core);
                core.channels.mark_all_unsubscribed();
                core.transition(ConnectionState::Disconnected);
            }
        }
        self.flush();
    }

    fn open_socket(self: &Arc<Self>, core: &mut Core) {
        core.link.epoch += 1;
        let events = TransportEvents::new(Arc::downgrade(self), core.link.epoch);
        self.metrics.connect_attempted();

        match self.transport.open(events) {
            Ok(handle) => {
                debug!(%handle, epoch = core.link.epoch, "transport opened");
                core.link.handle = Some(handle);
            }
            Err(err) => {
                warn!(error = %err, "transport open failed");
                self.on_loss(core, err);
            }
        }
    }

    /// Forget the current socket and invalidate its epoch.
    fn close_socket(&self, core: &mut Core) {
        core.link.epoch += 1;
        core.link.socket_id = None;
        core.channels.reset_requests();
        if let Some(handle) = core.link.handle.take() {
            self.transport.close(handle);
        }
    }

    /// Hand one frame to the transport. A refused send counts as a lost socket.
    pub(crate) fn send(self: &Arc<Self>, core: &mut Core, msg: &OutboundMessage) -> bool {
        let Some(handle) = core.link.handle else {
            debug!(?msg, "no open socket, frame not sent");
            return false;
        };
        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode outbound frame");
                return false;
            }
        };
        match self.transport.send(handle, frame) {
            Ok(()) => {
                self.metrics.frame_sent();
                true
            }
            Err(err) => {
                self.metrics.send_failed();
                warn!(%handle, error = %err, "send failed");
                self.on_loss(core, err);
                false
            }
        }
    }

    pub(crate) fn handle_loss_event(self: &Arc<Self>, epoch: u64, cause: TransportError) {
        {
            let mut core = self.core.lock();
            if epoch != core.link.epoch {
                trace!(epoch, current = core.link.epoch, "ignoring loss from stale socket");
                return;
            }
            self.on_loss(&mut core, cause);
        }
        self.flush();
    }

    /// The live socket is gone: clear wire state, then retry or give up.
    fn on_loss(self: &Arc<Self>, core: &mut Core, cause: TransportError) {
        self.metrics.connection_lost();
        self.close_socket(core);
        core.channels.mark_all_unsubscribed();
        let message = cause.to_string();
        core.report_error(message, None, Some(cause));

        match core.link.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                if self.reconnect.allows_attempt(0) {
                    core.link.attempts = 0;
                    core.transition(ConnectionState::Reconnecting);
                    self.schedule_retry(core);
                } else {
                    core.transition(ConnectionState::Disconnected);
                }
            }
            // A retry socket failed before it was established.
            ConnectionState::Reconnecting => self.schedule_retry(core),
            ConnectionState::Disconnected | ConnectionState::All => {}
        }
    }

    fn schedule_retry(self: &Arc<Self>, core: &mut Core) {
        if !self.reconnect.allows_attempt(core.link.attempts) {
            warn!(
                attempts = core.link.attempts,
                "reconnect attempts exhausted, giving up"
            );
            core.transition(ConnectionState::Disconnected);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available for reconnect, giving up");
            core.transition(ConnectionState::Disconnected);
            return;
        };

        let delay = self.reconnect.delay_for(core.link.attempts);
        let token = CancellationToken::new();
        core.link.cancel_retry();
        core.link.retry = Some(token.clone());

        debug!(
            attempt = core.link.attempts + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(shared) = weak.upgrade() {
                shared.retry(&token);
            }
        });
    }

    fn retry(self: &Arc<Self>, token: &CancellationToken) {
        {
            let mut core = self.core.lock();
            if token.is_cancelled() || core.link.state != ConnectionState::Reconnecting {
                return;
            }
            core.link.retry = None;
            core.link.attempts += 1;
            self.metrics.reconnect_attempted();
            info!(attempt = core.link.attempts, "reconnection attempt");
            self.open_socket(&mut core);
        }
        self.flush();
    }

    pub(crate) fn handle_frame(self: &Arc<Self>, epoch: u64, raw: &str) {
        let auth_jobs = {
            let mut core = self.core.lock();
            if epoch != core.link.epoch {
                trace!(epoch, current = core.link.epoch, "ignoring frame from stale socket");
                return;
            }
            self.metrics.frame_received();

            match protocol::decode(raw) {
                Ok(msg) => self.on_message(&mut core, msg),
                Err(err) => {
                    self.metrics.frame_malformed();
                    warn!(error = %err, "dropping malformed frame");
                    Vec::new()
                }
            }
        };

        self.spawn_auth(auth_jobs);
        self.flush();
    }

    fn on_message(self: &Arc<Self>, core: &mut Core, msg: InboundMessage) -> Vec<AuthJob> {
        match msg {
            InboundMessage::ConnectionEstablished {
                socket_id,
                activity_timeout,
            } => match core.link.state {
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    info!(%socket_id, ?activity_timeout, "connection established");
                    core.link.socket_id = Some(socket_id);
                    core.link.attempts = 0;
                    self.metrics.connection_established();
                    core.transition(ConnectionState::Connected);
                    self.reconcile_connected(core)
                }
                state => {
                    debug!(%state, "duplicate connection_established ignored");
                    Vec::new()
                }
            },
            InboundMessage::Error { message, code } => {
                warn!(?code, %message, "service reported an error");
                core.report_error(message, code, None);
                Vec::new()
            }
            InboundMessage::Ping => {
                self.send(core, &OutboundMessage::Pong {});
                Vec::new()
            }
            InboundMessage::Pong => {
                trace!("pong");
                Vec::new()
            }
            InboundMessage::SubscriptionSucceeded { channel } => {
                self.subscription_succeeded(core, &channel);
                Vec::new()
            }
            InboundMessage::SubscriptionError(event) => {
                if !core.channels.take_answer(&event.channel) {
                    debug!(channel = %event.channel, "subscription error for an earlier subscribe ignored");
                    return Vec::new();
                }
                self.metrics.subscription_failed();
                warn!(channel = %event.channel, data = %event.data, "subscription rejected");
                if let Some(delivery) = route(&core.channels, &self.metrics, event) {
                    core.deliveries.push_back(delivery);
                }
                Vec::new()
            }
            InboundMessage::Event(event) => {
                if let Some(delivery) = route(&core.channels, &self.metrics, event) {
                    core.deliveries.push_back(delivery);
                }
                Vec::new()
            }
            InboundMessage::Unrouted { event } => {
                debug!(%event, "dropping event without a channel");
                Vec::new()
            }
        }
    }
}

/// Handle to the connection lifecycle.
///
/// Cheap to clone; all clones drive the same state machine.
#[derive(Clone)]
pub struct Connection {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("socket_id", &self.socket_id())
            .finish()
    }
}

impl Connection {
    pub fn new(
        transport: Arc<dyn Transport>,
        authorizer: Option<Arc<dyn Authorizer>>,
        reconnect: ReconnectConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        let shared = Arc::new(Shared {
            transport,
            authorizer,
            reconnect,
            metrics,
            core: Mutex::new(Core {
                link: Link::new(),
                channels: ChannelTable::default(),
                deliveries: VecDeque::new(),
            }),
            delivery_gate: ReentrantMutex::new(Cell::new(false)),
        });
        Self { shared }
    }

    /// Open the transport unless already connecting or connected.
    ///
    /// Transport failures are reported to listeners, never returned.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Close the transport and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Invoke `listener` on every future transition into `state`
    /// (every transition for [`ConnectionState::All`]).
    pub fn bind(&self, state: ConnectionState, listener: Arc<dyn ConnectionEventListener>) {
        self.shared
            .core
            .lock()
            .link
            .listeners
            .entry(state)
            .or_default()
            .push(listener);
    }

    /// Remove one registration of `listener` for `state`.
    pub fn unbind(&self, state: ConnectionState, listener: &Arc<dyn ConnectionEventListener>) -> bool {
        let mut core = self.shared.core.lock();
        let Some(list) = core.link.listeners.get_mut(&state) else {
            return false;
        };
        let removed = remove_first(list, listener);
        if list.is_empty() {
            core.link.listeners.remove(&state);
        }
        removed
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().link.state
    }

    /// Socket id assigned by the service for the current connection.
    pub fn socket_id(&self) -> Option<String> {
        self.shared.core.lock().link.socket_id.clone()
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.shared.metrics
    }
}
