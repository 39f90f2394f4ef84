//! Pusher client core
//!
//! Connection lifecycle and channel subscriptions for Pusher-protocol
//! realtime services. The socket itself is pluggable: anything implementing
//! [`Transport`] can drive the client.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pusher_client::{ChannelEvent, ConnectionState, ConnectionStateChange, Pusher, Transport};
//!
//! fn run(transport: Arc<dyn Transport>) -> Result<(), pusher_client::PusherError> {
//!     let pusher = Pusher::new("123456", transport)?;
//!
//!     pusher.connect_with(
//!         Some(Arc::new(|change: &ConnectionStateChange| {
//!             println!("{} -> {}", change.previous, change.current);
//!         })),
//!         &[],
//!     )?;
//!
//!     // Once connected:
//!     if pusher.state() == ConnectionState::Connected {
//!         pusher.subscribe(
//!             "my-channel",
//!             Some(Arc::new(|event: &ChannelEvent| println!("{}: {}", event.event, event.data))),
//!             &["price-update"],
//!         )?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Listeners never run while the client's internal lock is held, so they may
//! call back into the client freely.

pub mod auth;
pub mod channel;
pub mod config;
pub mod connection;
mod dispatcher;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod protocol;
pub mod pusher;
pub mod registry;
pub mod state;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use auth::{Authorizer, ChannelAuth};
pub use channel::{Channel, ChannelKind};
pub use config::{ClientConfig, ReconnectConfig, load_config};
pub use connection::Connection;
pub use error::{AuthError, ProtocolError, PusherError, TransportError};
pub use listener::{ChannelEventListener, ConnectionEventListener};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use protocol::ChannelEvent;
pub use pusher::{Pusher, PusherBuilder};
pub use registry::ChannelRegistry;
pub use state::{ConnectionState, ConnectionStateChange};
pub use transport::{Transport, TransportEvents, TransportHandle};
