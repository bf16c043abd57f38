use std::any::Any;
use std::fmt;

use bytes::{BufMut, BytesMut};

use super::{CoreId, Packet, PacketReader, PacketType};
use crate::error::SocketError;

// ── DisconnectReason ─────────────────────────────────────────────

/// Why a link is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The control node went away.
    RemoteClosed,
    /// The host is shutting down.
    ClientClosed,
    /// Credentials were rejected.
    AuthFail,
    /// Too many attempts; see `DisconnectPacket::rate_limit`.
    RateLimited,
    /// A code this build does not know. Kept so it can be echoed back.
    Unknown(i32),
}

impl DisconnectReason {
    pub fn code(self) -> i32 {
        match self {
            DisconnectReason::RemoteClosed => 1,
            DisconnectReason::ClientClosed => 2,
            DisconnectReason::AuthFail => 3,
            DisconnectReason::RateLimited => 4,
            DisconnectReason::Unknown(code) => code,
        }
    }
}

impl From<i32> for DisconnectReason {
    fn from(code: i32) -> Self {
        match code {
            1 => DisconnectReason::RemoteClosed,
            2 => DisconnectReason::ClientClosed,
            3 => DisconnectReason::AuthFail,
            4 => DisconnectReason::RateLimited,
            other => DisconnectReason::Unknown(other),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Unknown(code) => write!(f, "Unknown({code})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

// ── DisconnectPacket ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub reason: DisconnectReason,
    /// Seconds the client should wait before retrying (`RateLimited`).
    pub rate_limit: i32,
}

impl Default for DisconnectPacket {
    fn default() -> Self {
        Self {
            reason: DisconnectReason::ClientClosed,
            rate_limit: 0,
        }
    }
}

impl DisconnectPacket {
    pub fn new(reason: DisconnectReason) -> Self {
        Self {
            reason,
            rate_limit: 0,
        }
    }
}

impl Packet for DisconnectPacket {
    fn network_id(&self) -> u32 {
        Self::NETWORK_ID
    }

    fn name(&self) -> &'static str {
        "DisconnectPacket"
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_i32(self.reason.code());
        buf.put_i32(self.rate_limit);
    }

    fn decode_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), SocketError> {
        self.reason = DisconnectReason::from(reader.read_i32()?);
        self.rate_limit = reader.read_i32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PacketType for DisconnectPacket {
    const NETWORK_ID: u32 = CoreId::Disconnect as u32;
}
