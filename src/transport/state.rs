//! Connection state reported by the transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConnectionState {
    /// No socket and no attempt in flight. The next send starts one.
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the backoff before attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Gave up after the configured number of attempts. Only an explicit
    /// `connect()` leaves this state.
    Exhausted,
    /// Shut down by the caller. Only an explicit `connect()` leaves this
    /// state.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a send may start a connection attempt on its own.
    pub fn allows_auto_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Exhausted => write!(f, "exhausted"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
