use std::any::Any;

use bytes::{BufMut, BytesMut};

use super::{Packet, PacketReader};
use crate::error::SocketError;

/// Fallback for ids nobody registered.
///
/// Keeps the payload after the id untouched so it can be forwarded as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericPacket {
    id: u32,
    pub payload: Vec<u8>,
}

impl GenericPacket {
    pub fn new(id: u32, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

impl Packet for GenericPacket {
    fn network_id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &'static str {
        "GenericPacket"
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.payload);
    }

    fn decode_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), SocketError> {
        self.payload = reader.read_rest();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::EncodedPacket;

    #[test]
    fn generic_echoes_raw_bytes() {
        let raw = [0, 0, 0x12, 0x34, 1, 2, 3];
        let mut reader = PacketReader::new(&raw[4..]);
        let mut packet = GenericPacket::new(0x1234, Vec::new());
        packet.decode_payload(&mut reader).unwrap();
        assert_eq!(packet.payload, vec![1, 2, 3]);

        assert_eq!(EncodedPacket::new(&packet).as_bytes(), &raw);
    }
}
