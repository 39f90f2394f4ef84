//! Connection lifecycle states and transition rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// Binding key matching every transition. Never an actual state.
    All,
}

impl ConnectionState {
    /// The states a connection can actually occupy.
    pub const REAL: [ConnectionState; 4] = [
        Self::Connecting,
        Self::Connected,
        Self::Disconnected,
        Self::Reconnecting,
    ];

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Reconnecting)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "reconnecting" => Ok(Self::Reconnecting),
            "all" => Ok(Self::All),
            _ => Err(format!("unknown connection state: {s}")),
        }
    }
}

/// A single transition, as seen by connection listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
}

impl ConnectionStateChange {
    pub fn new(previous: ConnectionState, current: ConnectionState) -> Self {
        Self { previous, current }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn display_roundtrips_through_from_str() {
        for state in [Connecting, Connected, Disconnected, Reconnecting, All] {
            assert_eq!(state.to_string().parse::<ConnectionState>(), Ok(state));
        }
    }

    #[test]
    fn unknown_state_rejected() {
        assert!("open".parse::<ConnectionState>().is_err());
    }

    #[test]
    fn lifecycle_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Disconnected));
    }

    #[test]
    fn illegal_edges() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
        for state in ConnectionState::REAL {
            assert!(!state.can_transition_to(All));
            assert!(!All.can_transition_to(state));
        }
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
    }
}
