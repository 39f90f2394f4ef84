//! Application-facing facade: argument validation over one connection and
//! one channel registry.

use std::sync::Arc;

use crate::auth::Authorizer;
use crate::channel::{Channel, ChannelKind};
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::PusherError;
use crate::listener::{ChannelEventListener, ConnectionEventListener};
use crate::metrics::ClientMetrics;
use crate::registry::ChannelRegistry;
use crate::state::ConnectionState;
use crate::transport::Transport;

/// Builder for [`Pusher`] when the defaults are not enough.
pub struct PusherBuilder {
    api_key: String,
    config: ClientConfig,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl PusherBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            config: ClientConfig::default(),
            authorizer: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Required before subscribing to private or presence channels.
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Pusher, PusherError> {
        if self.api_key.trim().is_empty() {
            return Err(PusherError::InvalidArgument(
                "API key must not be empty".into(),
            ));
        }

        let metrics = Arc::new(ClientMetrics::new());
        let connection = Connection::new(
            transport,
            self.authorizer.clone(),
            self.config.reconnect.clone(),
            metrics,
        );
        let registry = ChannelRegistry::new(&connection);

        tracing::debug!(
            endpoint = %self.config.endpoint_url(&self.api_key),
            "client created"
        );

        Ok(Pusher {
            api_key: self.api_key,
            config: self.config,
            has_authorizer: self.authorizer.is_some(),
            connection,
            registry,
        })
    }
}

/// Client for a Pusher-protocol realtime service.
///
/// All operations return immediately; acknowledgments and events arrive on
/// bound listeners.
pub struct Pusher {
    api_key: String,
    config: ClientConfig,
    has_authorizer: bool,
    connection: Connection,
    registry: ChannelRegistry,
}

impl std::fmt::Debug for Pusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pusher")
            .field("api_key", &self.api_key)
            .field("connection", &self.connection)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Pusher {
    /// Client with default configuration and no authorizer.
    pub fn new(api_key: impl Into<String>, transport: Arc<dyn Transport>) -> Result<Self, PusherError> {
        PusherBuilder::new(api_key).build(transport)
    }

    pub fn builder(api_key: impl Into<String>) -> PusherBuilder {
        PusherBuilder::new(api_key)
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Bind `listener` to `states` (every state when empty), then connect.
    ///
    /// `None` with no states just connects; `None` with states is an error.
    pub fn connect_with(
        &self,
        listener: Option<Arc<dyn ConnectionEventListener>>,
        states: &[ConnectionState],
    ) -> Result<(), PusherError> {
        match listener {
            Some(listener) if states.is_empty() => {
                self.connection.bind(ConnectionState::All, listener);
            }
            Some(listener) => {
                for state in states {
                    self.connection.bind(*state, listener.clone());
                }
            }
            None if states.is_empty() => {}
            None => {
                return Err(PusherError::InvalidArgument(
                    "cannot bind to connection states without a listener".into(),
                ));
            }
        }
        self.connection.connect();
        Ok(())
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Subscribe to `channel_name`, binding `listener` to `events` (or to all
    /// events on the channel when `events` is empty).
    pub fn subscribe(
        &self,
        channel_name: &str,
        listener: Option<Arc<dyn ChannelEventListener>>,
        events: &[&str],
    ) -> Result<Arc<Channel>, PusherError> {
        if channel_name.is_empty() {
            return Err(PusherError::InvalidArgument(
                "channel name must not be empty".into(),
            ));
        }
        if listener.is_none() && !events.is_empty() {
            return Err(PusherError::InvalidArgument(
                "cannot bind to events without a listener".into(),
            ));
        }
        if events.iter().any(|e| e.is_empty()) {
            return Err(PusherError::InvalidArgument(
                "event names must not be empty".into(),
            ));
        }
        if ChannelKind::from_name(channel_name).requires_auth() && !self.has_authorizer {
            return Err(PusherError::MissingAuthorizer {
                channel: channel_name.to_string(),
            });
        }

        self.registry.subscribe(channel_name, listener, events)
    }

    pub fn unsubscribe(&self, channel_name: &str) -> Result<(), PusherError> {
        if channel_name.is_empty() {
            return Err(PusherError::InvalidArgument(
                "channel name must not be empty".into(),
            ));
        }
        self.registry.unsubscribe(channel_name)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.registry.channel(name)
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        self.connection.metrics()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
