//! Connection state machine published by the engine.
//!
//! The engine owns the only writer; the host reads snapshots. Transitions
//! are validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::SocketError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of the link to the control node.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected ──► Authenticating ──► Authenticated
///       ▲               │              │               │                  │
///       └───────────────┴──────────────┴───────────────┴──────────────────┘
///                                (socket closed)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No socket. Initial state, and where every failure lands.
    #[default]
    Disconnected,

    /// TCP connect + TLS handshake in progress.
    Connecting,

    /// TLS is up; no login has reached the wire yet.
    Connected,

    /// Login written, waiting for the node's answer.
    Authenticating,

    /// The node accepted us.
    Authenticated {
        /// Node id handed out by the server.
        node: i32,
        since: Instant,
    },
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Authenticated { .. } => write!(f, "Authenticated"),
        }
    }
}

impl ConnectionPhase {
    /// A TLS socket is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Authenticating | Self::Authenticated { .. }
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// A connect attempt is underway.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// A login for this connection already reached the wire.
    pub fn login_sent(&self) -> bool {
        matches!(self, Self::Authenticating | Self::Authenticated { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Node id assigned at login, once authenticated.
    pub fn assigned_node(&self) -> Option<i32> {
        match self {
            Self::Authenticated { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// How long the link has been authenticated.
    pub fn authenticated_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Authenticated { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), SocketError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(SocketError::Configuration(format!(
                "cannot connect while {self}"
            ))),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), SocketError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(SocketError::Configuration(format!(
                "cannot complete connect while {self}"
            ))),
        }
    }

    /// Valid from: `Connected`. Staying in `Authenticating` is allowed so a
    /// second login on the same socket is harmless.
    pub fn begin_authentication(&mut self) -> Result<(), SocketError> {
        match self {
            Self::Connected | Self::Authenticating => {
                *self = Self::Authenticating;
                Ok(())
            }
            _ => Err(SocketError::Configuration(format!(
                "cannot authenticate while {self}"
            ))),
        }
    }

    /// Valid from: `Connected`, `Authenticating`.
    pub fn complete_authentication(&mut self, node: i32) -> Result<(), SocketError> {
        match self {
            Self::Connected | Self::Authenticating => {
                *self = Self::Authenticated {
                    node,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(SocketError::Configuration(format!(
                "cannot complete authentication while {self}"
            ))),
        }
    }

    /// Socket gone: back to `Disconnected` from anywhere.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── ConnectionState ──────────────────────────────────────────────

/// Snapshot the engine publishes after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Bumped on every successful connect. Lets the host tell one
    /// connection from the next.
    pub epoch: u64,
    /// Reconnects scheduled since the last successful connect.
    pub failed_attempts: u32,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase.is_authenticated()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.phase.is_reconnecting()
    }

    pub fn login_sent(&self) -> bool {
        self.phase.login_sent()
    }

    pub fn assigned_node(&self) -> Option<i32> {
        self.phase.assigned_node()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ConnectionPhase::Disconnected;

        phase.begin_connect().unwrap();
        assert!(phase.is_reconnecting());

        phase.complete_connect().unwrap();
        assert!(phase.is_connected());
        assert!(!phase.login_sent());

        phase.begin_authentication().unwrap();
        assert!(phase.login_sent());
        assert!(!phase.is_authenticated());

        phase.complete_authentication(5).unwrap();
        assert!(phase.is_authenticated());
        assert_eq!(phase.assigned_node(), Some(5));
        assert!(phase.authenticated_duration().is_some());

        phase.force_disconnect();
        assert!(phase.is_disconnected());
        assert!(!phase.login_sent());
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut phase = ConnectionPhase::Connected;
        assert!(phase.begin_connect().is_err());
    }

    #[test]
    fn invalid_transition_authenticate_from_disconnected() {
        let mut phase = ConnectionPhase::Disconnected;
        assert!(phase.begin_authentication().is_err());
        assert!(phase.complete_authentication(1).is_err());
    }

    #[test]
    fn node_reply_without_observed_login_still_authenticates() {
        let mut phase = ConnectionPhase::Connected;
        phase.complete_authentication(2).unwrap();
        assert_eq!(phase.assigned_node(), Some(2));
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionPhase::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionPhase::Authenticating.to_string(), "Authenticating");
        assert_eq!(
            ConnectionPhase::Authenticated {
                node: 1,
                since: Instant::now()
            }
            .to_string(),
            "Authenticated"
        );
    }

    #[test]
    fn default_state_is_disconnected() {
        let state = ConnectionState::default();
        assert!(state.phase.is_disconnected());
        assert!(!state.is_connected());
        assert_eq!(state.epoch, 0);
    }
}
