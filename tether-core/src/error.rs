//! Domain-specific error types for the tether link.
//!
//! All fallible operations return `Result<T, SocketError>`.
//! Malformed input from the wire never panics; it surfaces as a typed error
//! that the caller logs and recovers from.

use thiserror::Error;

/// The canonical error type for the tether link.
#[derive(Debug, Error)]
pub enum SocketError {
    // ── Connection Errors ────────────────────────────────────────
    /// The remote node actively refused the TCP connection.
    ///
    /// This is the ordinary "server is down" case and only enters backoff.
    #[error("connection refused by {addr}")]
    ConnectionRefused { addr: String },

    /// Any other failure while establishing the TCP/TLS link.
    #[error("failed to connect to {addr}: {reason}")]
    ConnectFault { addr: String, reason: String },

    /// The TCP/IO layer reported an error on an established link.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration could not be built.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// A cross-thread queue was disconnected.
    #[error("channel closed")]
    ChannelClosed,

    // ── Protocol Errors ──────────────────────────────────────────
    /// A decoder saw a packet id that does not belong to its type.
    #[error("protocol mismatch: expected packet id {expected:#x}, got {actual:#x}")]
    ProtocolMismatch { expected: u32, actual: u32 },

    /// A field ran past the end of the buffer.
    #[error("truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string field did not hold valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A frame announced a payload larger than the reassembler accepts.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The node rejected our credentials.
    #[error("authentication rejected by the remote node")]
    AuthenticationFailure,

    // ── Host-side Errors ─────────────────────────────────────────
    /// A packet listener returned an error or panicked.
    #[error("listener {listener} failed: {reason}")]
    ListenerFault { listener: u64, reason: String },

    /// The engine's run loop died.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// An API was used in a way that can never work.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The settings file could not be parsed.
    #[error("invalid settings: {0}")]
    Settings(#[from] toml::de::Error),
}

impl SocketError {
    /// Classify a failed connect attempt.
    ///
    /// Refusals get their own variant so the engine can keep them quiet.
    pub fn from_connect(addr: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            SocketError::ConnectionRefused {
                addr: addr.to_string(),
            }
        } else {
            SocketError::ConnectFault {
                addr: addr.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Returns `true` for failures that are part of the normal retry cycle.
    pub fn is_refusal(&self) -> bool {
        matches!(self, SocketError::ConnectionRefused { .. })
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<crossbeam_channel::SendError<T>> for SocketError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        SocketError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SocketError::ProtocolMismatch {
            expected: 0x1,
            actual: 0x2,
        };
        assert!(e.to_string().contains("0x1"));
        assert!(e.to_string().contains("0x2"));

        let e = SocketError::FrameTooLarge { size: 1000, max: 500 };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn refused_connect_is_classified() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        let e = SocketError::from_connect("127.0.0.1:1", io_err);
        assert!(e.is_refusal());
        assert!(e.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn other_connect_failures_are_faults() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let e = SocketError::from_connect("node:9", io_err);
        assert!(!e.is_refusal());
        assert!(matches!(e, SocketError::ConnectFault { .. }));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: SocketError = io_err.into();
        assert!(matches!(e, SocketError::Io(_)));
    }
}
