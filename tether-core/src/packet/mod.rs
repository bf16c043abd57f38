//! Packet encode/decode contract and the core packet catalogue.
//!
//! # Wire layout
//!
//! ```text
//! Payload  := PacketId(u32 BE) TypeSpecificFields
//! string   := u32 BE byte length, UTF-8 bytes
//! bytes    := u32 BE byte length, raw bytes
//! bool     := u8 (0 = false)
//! ```
//!
//! Packets are encoded exactly once into an [`EncodedPacket`] before they
//! enter the outbound queue, and decoded exactly once from a raw buffer on
//! the host side.

mod disconnect;
mod generic;
mod keep_alive;
mod login;

pub use disconnect::{DisconnectPacket, DisconnectReason};
pub use generic::GenericPacket;
pub use keep_alive::KeepAlivePacket;
pub use login::LoginPacket;

use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::SocketError;

/// Size of the packet id at the start of every payload.
pub const ID_SIZE: usize = 4;

/// Ids below this value are reserved for the core catalogue.
pub const CORE_ID_LIMIT: u32 = 0x100;

// ── CoreId ───────────────────────────────────────────────────────

/// Packet ids owned by the link itself.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreId {
    /// Credentials from the client, node assignment from the server.
    Login = 0x01,
    /// Either side is closing the link.
    Disconnect = 0x02,
    /// Periodic liveness probe.
    KeepAlive = 0x03,
}

impl TryFrom<u32> for CoreId {
    type Error = SocketError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CoreId::Login),
            0x02 => Ok(CoreId::Disconnect),
            0x03 => Ok(CoreId::KeepAlive),
            _ => Err(SocketError::Configuration(format!(
                "{value:#x} is not a core packet id"
            ))),
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Packet ───────────────────────────────────────────────────────

/// A typed, schema-identified message.
pub trait Packet: fmt::Debug + Send + 'static {
    /// Stable id written as the first four payload bytes.
    fn network_id(&self) -> u32;

    /// Human readable type name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Write the type-specific fields (the id is written by the caller).
    fn encode_payload(&self, buf: &mut BytesMut);

    /// Read the type-specific fields, in the same order as `encode_payload`.
    fn decode_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), SocketError>;

    fn as_any(&self) -> &dyn Any;
}

/// A packet type with a fixed id, decodable from scratch.
pub trait PacketType: Packet + Default {
    const NETWORK_ID: u32;
}

impl dyn Packet {
    /// Downcast a decoded packet to its concrete type.
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Result of decoding one raw buffer.
#[derive(Debug)]
pub struct Decoded<P> {
    pub packet: P,
    /// Bytes left after the decoder finished. Non-zero means the two ends
    /// disagree on the schema.
    pub unread: usize,
}

/// Decode a raw buffer as `P`, verifying the leading id.
pub fn decode<P: PacketType>(raw: &[u8]) -> Result<Decoded<P>, SocketError> {
    let mut reader = PacketReader::new(raw);
    let actual = reader.read_u32()?;
    if actual != P::NETWORK_ID {
        return Err(SocketError::ProtocolMismatch {
            expected: P::NETWORK_ID,
            actual,
        });
    }

    let mut packet = P::default();
    packet.decode_payload(&mut reader)?;
    Ok(Decoded {
        packet,
        unread: reader.remaining(),
    })
}

/// Read the packet id of a raw buffer without decoding it.
pub fn peek_id(raw: &[u8]) -> Option<u32> {
    raw.get(..ID_SIZE)
        .map(|id| u32::from_be_bytes([id[0], id[1], id[2], id[3]]))
}

// ── EncodedPacket ────────────────────────────────────────────────

/// A packet that has been encoded and may cross the thread boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    id: u32,
    buffer: Bytes,
}

impl EncodedPacket {
    /// Encode `packet`: id first, then its fields.
    pub fn new(packet: &dyn Packet) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(packet.network_id());
        packet.encode_payload(&mut buf);
        Self {
            id: packet.network_id(),
            buffer: buf.freeze(),
        }
    }

    /// Wrap bytes that are already an encoded payload.
    pub fn from_raw(buffer: Bytes) -> Result<Self, SocketError> {
        let id = peek_id(&buffer).ok_or(SocketError::Truncated {
            needed: ID_SIZE,
            remaining: buffer.len(),
        })?;
        Ok(Self { id, buffer })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer
    }
}

impl<P: Packet> From<&P> for EncodedPacket {
    fn from(packet: &P) -> Self {
        EncodedPacket::new(packet)
    }
}

// ── Reading / writing fields ─────────────────────────────────────

/// Bounds-checked cursor over a raw payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> Result<(), SocketError> {
        if self.buf.len() < needed {
            return Err(SocketError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, SocketError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32, SocketError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_bool(&mut self) -> Result<bool, SocketError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    /// Length-prefixed raw bytes.
    pub fn read_byte_block(&mut self) -> Result<Vec<u8>, SocketError> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        let block = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(block)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, SocketError> {
        let bytes = self.read_byte_block()?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Everything that is left.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.buf.to_vec();
        self.buf = &[];
        rest
    }
}

pub fn write_byte_block(buf: &mut BytesMut, block: &[u8]) {
    buf.put_u32(block.len() as u32);
    buf.put_slice(block);
}

pub fn write_string(buf: &mut BytesMut, value: &str) {
    write_byte_block(buf, value.as_bytes());
}

pub fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(value as u8);
}
