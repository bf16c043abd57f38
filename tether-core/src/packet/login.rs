use std::any::Any;

use bytes::{BufMut, BytesMut};

use super::{CoreId, Packet, PacketReader, PacketType, write_bool, write_byte_block, write_string};
use crate::error::SocketError;

/// Credentials on the way out, node assignment on the way back.
///
/// The client fills `password` and/or the public-key fields; the server
/// answers with the same packet carrying `assigned_node`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginPacket {
    pub assigned_node: i32,
    pub password: String,
    pub is_public_key_auth: bool,
    pub public_key_data: Vec<u8>,
}

impl LoginPacket {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_public_key(public_key_data: Vec<u8>) -> Self {
        Self {
            is_public_key_auth: true,
            public_key_data,
            ..Default::default()
        }
    }
}

impl Packet for LoginPacket {
    fn network_id(&self) -> u32 {
        Self::NETWORK_ID
    }

    fn name(&self) -> &'static str {
        "LoginPacket"
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_i32(self.assigned_node);
        write_string(buf, &self.password);
        write_bool(buf, self.is_public_key_auth);
        write_byte_block(buf, &self.public_key_data);
    }

    fn decode_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), SocketError> {
        self.assigned_node = reader.read_i32()?;
        self.password = reader.read_string()?;
        self.is_public_key_auth = reader.read_bool()?;
        self.public_key_data = reader.read_byte_block()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PacketType for LoginPacket {
    const NETWORK_ID: u32 = CoreId::Login as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{EncodedPacket, decode};

    #[test]
    fn login_roundtrip() {
        let login = LoginPacket {
            assigned_node: 5,
            password: "secret".into(),
            is_public_key_auth: true,
            public_key_data: vec![1, 2, 3, 4],
        };
        let encoded = EncodedPacket::new(&login);
        let decoded = decode::<LoginPacket>(encoded.as_bytes()).unwrap();
        assert_eq!(decoded.packet, login);
        assert_eq!(decoded.unread, 0);
    }

    #[test]
    fn login_field_order() {
        let encoded = EncodedPacket::new(&LoginPacket::with_password("ab"));
        assert_eq!(
            encoded.as_bytes(),
            &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn login_rejects_other_ids() {
        let encoded = EncodedPacket::new(&crate::packet::KeepAlivePacket);
        assert!(matches!(
            decode::<LoginPacket>(encoded.as_bytes()),
            Err(SocketError::ProtocolMismatch { expected: 1, actual: 3 })
        ));
    }
}
