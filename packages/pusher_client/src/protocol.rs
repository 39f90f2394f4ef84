//! Pusher protocol 7 wire messages.
//!
//! Every frame is a JSON object: `{ "event": "...", "channel": "...", "data": ... }`.
//! `data` is usually a JSON-encoded string, but some servers send an object;
//! both are accepted and normalized to a string for listeners.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Protocol revision announced in the connection URL.
pub const PROTOCOL_VERSION: u32 = 7;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const ERROR: &str = "pusher:error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
/// Delivered to channel listeners when the service (or the authorizer)
/// rejects a subscription.
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";

/// An event delivered on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    ConnectionEstablished {
        socket_id: String,
        activity_timeout: Option<u64>,
    },
    Error {
        message: String,
        code: Option<i64>,
    },
    Ping,
    Pong,
    SubscriptionSucceeded {
        channel: String,
    },
    SubscriptionError(ChannelEvent),
    Event(ChannelEvent),
    /// An application event with no channel attached.
    Unrouted {
        event: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EstablishedData {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

fn data_string(data: Option<Value>) -> String {
    match data {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Parse a raw text frame.
pub fn decode(raw: &str) -> Result<InboundMessage, ProtocolError> {
    let frame: RawFrame = serde_json::from_str(raw)?;
    let data = data_string(frame.data);

    let msg = match frame.event.as_str() {
        CONNECTION_ESTABLISHED => {
            let established: EstablishedData = serde_json::from_str(&data)?;
            InboundMessage::ConnectionEstablished {
                socket_id: established.socket_id,
                activity_timeout: established.activity_timeout,
            }
        }
        ERROR => {
            // Error payloads are occasionally plain strings.
            let parsed: Option<ErrorData> = serde_json::from_str(&data).ok();
            match parsed {
                Some(err) => InboundMessage::Error {
                    message: err.message.unwrap_or_default(),
                    code: err.code,
                },
                None => InboundMessage::Error {
                    message: data,
                    code: None,
                },
            }
        }
        PING => InboundMessage::Ping,
        PONG => InboundMessage::Pong,
        SUBSCRIPTION_SUCCEEDED => {
            let channel = frame.channel.ok_or_else(|| ProtocolError::MissingField {
                event: frame.event.clone(),
                field: "channel",
            })?;
            InboundMessage::SubscriptionSucceeded { channel }
        }
        _ => match frame.channel {
            Some(channel) => {
                let event = ChannelEvent {
                    channel,
                    event: frame.event,
                    data,
                    user_id: frame.user_id,
                };
                if event.event == SUBSCRIPTION_ERROR {
                    InboundMessage::SubscriptionError(event)
                } else {
                    InboundMessage::Event(event)
                }
            }
            None => InboundMessage::Unrouted { event: frame.event },
        },
    };
    Ok(msg)
}

/// Requests sent from the client to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "pusher:subscribe")]
    Subscribe {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_data: Option<String>,
    },
    #[serde(rename = "pusher:unsubscribe")]
    Unsubscribe { channel: String },
    #[serde(rename = "pusher:ping")]
    Ping {},
    #[serde(rename = "pusher:pong")]
    Pong {},
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
