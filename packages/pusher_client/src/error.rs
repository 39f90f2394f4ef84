//! Error types and stable error codes.

use crate::state::ConnectionState;

/// Errors returned synchronously from the application-facing API.
#[derive(Debug, thiserror::Error)]
pub enum PusherError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("channel {channel} requires an authorizer")]
    MissingAuthorizer { channel: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl PusherError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState { .. } => "invalid_state",
            Self::MissingAuthorizer { .. } => "missing_authorizer",
            Self::Config(_) => "invalid_config",
        }
    }
}

impl From<figment::Error> for PusherError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

/// Failures reported by a [`Transport`](crate::Transport).
///
/// These never escape a public call; the connection recovers from them and
/// reports them to bound listeners through `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Open(String),

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Open(_) => "transport_open",
            Self::Send(_) => "transport_send",
            Self::Closed => "transport_closed",
            Self::Protocol(_) => "transport_protocol",
        }
    }
}

/// Failure to obtain a channel authorization token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authorization rejected: {0}")]
    Rejected(String),

    #[error("authorizer unavailable: {0}")]
    Unavailable(String),
}

/// A malformed inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame {event} is missing field {field}")]
    MissingField { event: String, field: &'static str },
}
