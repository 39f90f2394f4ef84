use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::PusherError;
use crate::protocol::PROTOCOL_VERSION;

// =============================================================================
// Client config (figment-deserialized from defaults / pusher.toml / env vars)
// =============================================================================
//
//   pusher.toml:     [reconnect]
//                    max_attempts = 10
//
//   env var:         PUSHER_RECONNECT__MAX_ATTEMPTS=10   (double underscore = nesting)

/// Top-level client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Explicit host; overrides `cluster` when set.
    #[serde(default)]
    pub host: Option<String>,
    /// Cluster name, e.g. `eu` → `ws-eu.pusher.com`.
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_wss_port")]
    pub wss_port: u16,
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
    /// Seconds of inbound silence before the transport sends a ping.
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,
    /// Seconds to wait for a pong before treating the socket as dead.
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            cluster: None,
            ws_port: default_ws_port(),
            wss_port: default_wss_port(),
            encrypted: default_encrypted(),
            activity_timeout_secs: default_activity_timeout_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Automatic retry after the transport drops (lives under `[reconnect]`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// When false, a lost connection goes straight to `Disconnected`.
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    /// Attempts per outage before giving up; 0 retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay before the zero-based `attempt`: exponential, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempts < self.max_attempts)
    }
}

fn default_ws_port() -> u16 {
    80
}
fn default_wss_port() -> u16 {
    443
}
fn default_encrypted() -> bool {
    true
}
fn default_activity_timeout_secs() -> u64 {
    120
}
fn default_pong_timeout_secs() -> u64 {
    30
}
fn default_reconnect_enabled() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    6
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

const DEFAULT_HOST: &str = "ws.pusherapp.com";

impl ClientConfig {
    /// Host the transport connects to.
    pub fn resolved_host(&self) -> String {
        match (&self.host, &self.cluster) {
            (Some(host), _) => host.clone(),
            (None, Some(cluster)) => format!("ws-{cluster}.pusher.com"),
            (None, None) => DEFAULT_HOST.to_string(),
        }
    }

    /// WebSocket URL for `app_key`.
    pub fn endpoint_url(&self, app_key: &str) -> String {
        let (scheme, port) = if self.encrypted {
            ("wss", self.wss_port)
        } else {
            ("ws", self.ws_port)
        };
        format!(
            "{scheme}://{}:{port}/app/{app_key}?client=rust-pusher&version={}&protocol={PROTOCOL_VERSION}",
            self.resolved_host(),
            env!("CARGO_PKG_VERSION"),
        )
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Layer defaults → `config_file` (if given) → `PUSHER_*` env vars.
    pub fn load(config_file: Option<&Path>) -> Result<Self, PusherError> {
        Ok(load_config(config_file).extract()?)
    }
}

/// Build the figment used by [`ClientConfig::load`].
///
/// Env vars use double-underscore for nesting into sections:
///   `PUSHER_ENCRYPTED=false`  →  `encrypted = false`
///   `PUSHER_RECONNECT__ENABLED=false`  →  `reconnect.enabled = false`
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("PUSHER_").split("__"))
}
