//! Channel registry: desired vs. actual subscriptions.
//!
//! A channel is desired while it is in the table. Its `subscribed` flag is the
//! actual state, set only by the service's acknowledgment on the current
//! socket. Every transition into `Connected` replays the desired set.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::connection::{Connection, Core, Shared};
use crate::dispatcher::Delivery;
use crate::error::{AuthError, PusherError};
use crate::listener::ChannelEventListener;
use crate::protocol::{ChannelEvent, OutboundMessage, SUBSCRIPTION_ERROR};
use crate::state::ConnectionState;

/// Name → channel map. At most one instance per name.
///
/// Also pairs the service's answers with the subscribe requests sent on the
/// current socket. The service answers requests in order but only names the
/// channel, so an answer owed to a removed instance must not reach a newer
/// instance with the same name.
#[derive(Default)]
pub(crate) struct ChannelTable {
    channels: HashMap<String, Arc<Channel>>,
    unanswered: HashMap<String, u32>,
    stale_answers: HashMap<String, u32>,
}

impl ChannelTable {
    pub(crate) fn get(&self, name: &str) -> Option<&Arc<Channel>> {
        self.channels.get(name)
    }

    pub(crate) fn insert(&mut self, channel: Arc<Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Arc<Channel>> {
        if let Some(owed) = self.unanswered.remove(name) {
            *self.stale_answers.entry(name.to_string()).or_default() += owed;
        }
        self.channels.remove(name)
    }

    pub(crate) fn request_sent(&mut self, name: &str) {
        *self.unanswered.entry(name.to_string()).or_default() += 1;
    }

    /// Consume the answer (ack or subscription error) the service just sent
    /// for `name`. Returns `false` when it answers a request made for an
    /// instance that has since been removed.
    pub(crate) fn take_answer(&mut self, name: &str) -> bool {
        if take_one(&mut self.stale_answers, name) {
            return false;
        }
        take_one(&mut self.unanswered, name);
        true
    }

    /// The socket is gone; nothing sent on it will be answered.
    pub(crate) fn reset_requests(&mut self) {
        self.unanswered.clear();
        self.stale_answers.clear();
    }

    /// Channels sorted by name, so replays go out in a stable order.
    pub(crate) fn sorted(&self) -> Vec<Arc<Channel>> {
        let mut channels: Vec<_> = self.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.name().cmp(b.name()));
        channels
    }

    pub(crate) fn mark_all_unsubscribed(&self) {
        for channel in self.channels.values() {
            channel.set_subscribed(false);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }
}

fn take_one(counts: &mut HashMap<String, u32>, name: &str) -> bool {
    let Some(count) = counts.get_mut(name) else {
        return false;
    };
    *count -= 1;
    if *count == 0 {
        counts.remove(name);
    }
    true
}

/// A private or presence subscribe waiting on the authorizer.
///
/// Carries the epoch and socket id it was created under; the result is
/// discarded if the connection moved on in the meantime.
pub(crate) struct AuthJob {
    channel: Arc<Channel>,
    socket_id: String,
    epoch: u64,
}

impl Shared {
    /// Send the subscribe request for `channel`, or hand back an [`AuthJob`]
    /// when the channel needs a token first.
    fn request_subscription(self: &Arc<Self>, core: &mut Core, channel: &Arc<Channel>) -> Option<AuthJob> {
        channel.set_subscribed(false);

        if channel.kind().requires_auth() {
            let socket_id = core.link.socket_id.clone()?;
            return Some(AuthJob {
                channel: channel.clone(),
                socket_id,
                epoch: core.link.epoch,
            });
        }

        self.metrics.subscribe_requested();
        debug!(channel = %channel.name(), "requesting subscription");
        let sent = self.send(
            core,
            &OutboundMessage::Subscribe {
                channel: channel.name().to_string(),
                auth: None,
                channel_data: None,
            },
        );
        if sent {
            core.channels.request_sent(channel.name());
        }
        None
    }

    /// Replay every desired channel on a freshly established socket.
    pub(crate) fn reconcile_connected(self: &Arc<Self>, core: &mut Core) -> Vec<AuthJob> {
        let channels = core.channels.sorted();
        if !channels.is_empty() {
            info!(channels = channels.len(), "resubscribing desired channels");
        }

        let mut jobs = Vec::new();
        for channel in channels {
            // A failed send drops the socket; the next establish replays again.
            if core.link.state != ConnectionState::Connected {
                break;
            }
            jobs.extend(self.request_subscription(core, &channel));
        }
        jobs
    }

    /// Run `jobs` off the calling thread: on tokio's blocking pool when a
    /// runtime is available, otherwise on a worker thread of its own.
    pub(crate) fn spawn_auth(self: &Arc<Self>, jobs: Vec<AuthJob>) {
        if jobs.is_empty() {
            return;
        }
        let shared = self.clone();
        let work = move || {
            shared.complete_auth(jobs);
            shared.flush();
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(work);
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("pusher-auth".into())
                    .spawn(work);
                if let Err(err) = spawned {
                    warn!(error = %err, "failed to start authorization worker");
                }
            }
        }
    }

    /// Run the authorizer for each job outside the lock, then send.
    ///
    /// The connection may have moved on while the authorizer ran; a result for
    /// an old socket or a removed channel is dropped.
    fn complete_auth(self: &Arc<Self>, jobs: Vec<AuthJob>) {
        for job in jobs {
            let name = job.channel.name();
            let result = match &self.authorizer {
                Some(authorizer) => authorizer.authorize(name, &job.socket_id),
                None => Err(AuthError::Unavailable("no authorizer configured".into())),
            };

            let mut core = self.core.lock();
            let still_wanted = core.link.epoch == job.epoch
                && core.link.state == ConnectionState::Connected
                && core
                    .channels
                    .get(name)
                    .is_some_and(|current| Arc::ptr_eq(current, &job.channel));
            if !still_wanted {
                debug!(channel = %name, "discarding authorization for stale subscribe");
                continue;
            }

            match result {
                Ok(token) => {
                    self.metrics.subscribe_requested();
                    debug!(channel = %name, "requesting authorized subscription");
                    let sent = self.send(
                        &mut core,
                        &OutboundMessage::Subscribe {
                            channel: name.to_string(),
                            auth: Some(token.auth),
                            channel_data: token.channel_data,
                        },
                    );
                    if sent {
                        core.channels.request_sent(name);
                    }
                }
                Err(err) => {
                    self.metrics.subscription_failed();
                    warn!(channel = %name, error = %err, "channel authorization failed");
                    let data = serde_json::json!({ "type": "AuthError", "error": err.to_string() });
                    core.deliveries.push_back(Delivery::Event {
                        channel: job.channel.clone(),
                        event: ChannelEvent {
                            channel: name.to_string(),
                            event: SUBSCRIPTION_ERROR.to_string(),
                            data: data.to_string(),
                            user_id: None,
                        },
                    });
                }
            }
        }
    }

    /// The service acknowledged a subscribe on the current socket.
    pub(crate) fn subscription_succeeded(&self, core: &mut Core, name: &str) {
        if !core.channels.take_answer(name) {
            debug!(channel = %name, "acknowledgment for an earlier subscribe ignored");
            return;
        }
        let Some(channel) = core.channels.get(name).cloned() else {
            debug!(channel = %name, "acknowledgment for channel no longer desired");
            return;
        };
        info!(channel = %name, "subscribed");
        channel.set_subscribed(true);
        core.deliveries
            .push_back(Delivery::SubscriptionSucceeded { channel });
    }
}

/// Subscription manager bound to one [`Connection`].
#[derive(Clone)]
pub struct ChannelRegistry {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.desired_channels())
            .finish()
    }
}

impl ChannelRegistry {
    pub fn new(connection: &Connection) -> Self {
        Self {
            shared: connection.shared.clone(),
        }
    }

    /// Subscribe to `name`, binding `listener` to `events` (to every event
    /// when `events` is empty).
    ///
    /// Only legal while connected. A second subscribe to the same name binds
    /// onto the existing channel and sends nothing.
    pub fn subscribe(
        &self,
        name: &str,
        listener: Option<Arc<dyn ChannelEventListener>>,
        events: &[&str],
    ) -> Result<Arc<Channel>, PusherError> {
        let (channel, job) = {
            let mut core = self.shared.core.lock();
            let state = core.link.state;
            if state != ConnectionState::Connected {
                return Err(PusherError::InvalidState {
                    operation: "subscribe",
                    state,
                });
            }

            let existing = core.channels.get(name).cloned();
            let (channel, created) = match existing {
                Some(channel) => (channel, false),
                None => {
                    let channel = Arc::new(Channel::new(name, self.shared.metrics.clone()));
                    core.channels.insert(channel.clone());
                    (channel, true)
                }
            };

            if let Some(listener) = listener {
                if events.is_empty() {
                    channel.bind_all(listener);
                } else {
                    for event in events {
                        channel.bind(event, listener.clone());
                    }
                }
            }

            let job = if created {
                info!(channel = %name, kind = %channel.kind(), "channel added");
                self.shared.request_subscription(&mut core, &channel)
            } else {
                debug!(channel = %name, "channel already desired, merged bindings");
                None
            };
            (channel, job)
        };

        self.shared.spawn_auth(job.into_iter().collect());
        self.shared.flush();
        Ok(channel)
    }

    /// Stop wanting `name`. The channel leaves the registry immediately;
    /// events already in flight for it are dropped.
    pub fn unsubscribe(&self, name: &str) -> Result<(), PusherError> {
        {
            let mut core = self.shared.core.lock();
            let state = core.link.state;
            if state != ConnectionState::Connected {
                return Err(PusherError::InvalidState {
                    operation: "unsubscribe",
                    state,
                });
            }

            let Some(channel) = core.channels.remove(name) else {
                debug!(channel = %name, "unsubscribe for unknown channel ignored");
                return Ok(());
            };
            channel.set_subscribed(false);
            info!(channel = %name, "channel removed");
            self.shared.metrics.unsubscribe_requested();
            self.shared.send(
                &mut core,
                &OutboundMessage::Unsubscribe {
                    channel: name.to_string(),
                },
            );
        }
        self.shared.flush();
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.shared.core.lock().channels.get(name).cloned()
    }

    /// Names of every desired channel, sorted.
    pub fn desired_channels(&self) -> Vec<String> {
        self.shared
            .core
            .lock()
            .channels
            .sorted()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.core.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
