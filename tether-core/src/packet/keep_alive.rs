use std::any::Any;

use bytes::BytesMut;

use super::{CoreId, Packet, PacketReader, PacketType};
use crate::error::SocketError;

/// Liveness probe. Carries nothing but its id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAlivePacket;

impl Packet for KeepAlivePacket {
    fn network_id(&self) -> u32 {
        Self::NETWORK_ID
    }

    fn name(&self) -> &'static str {
        "KeepAlivePacket"
    }

    fn encode_payload(&self, _buf: &mut BytesMut) {}

    fn decode_payload(&mut self, _reader: &mut PacketReader<'_>) -> Result<(), SocketError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PacketType for KeepAlivePacket {
    const NETWORK_ID: u32 = CoreId::KeepAlive as u32;
}
