//! Packet id → decoder mapping.
//!
//! Built once at the composition root and shared by `Arc` with every
//! session that needs it. Ids nobody registered decode as
//! [`GenericPacket`].

use std::collections::HashMap;

use crate::error::SocketError;
use crate::packet::{
    CORE_ID_LIMIT, Decoded, DisconnectPacket, GenericPacket, KeepAlivePacket, LoginPacket, Packet,
    PacketReader, PacketType, decode, peek_id,
};

type DecodeFn = fn(&[u8]) -> Result<Decoded<Box<dyn Packet>>, SocketError>;

fn decode_boxed<P: PacketType>(raw: &[u8]) -> Result<Decoded<Box<dyn Packet>>, SocketError> {
    let Decoded { packet, unread } = decode::<P>(raw)?;
    Ok(Decoded {
        packet: Box::new(packet),
        unread,
    })
}

pub struct PacketRegistry {
    decoders: HashMap<u32, DecodeFn>,
}

impl PacketRegistry {
    /// A registry holding the core catalogue.
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.insert::<LoginPacket>();
        registry.insert::<DisconnectPacket>();
        registry.insert::<KeepAlivePacket>();
        registry
    }

    fn insert<P: PacketType>(&mut self) {
        self.decoders.insert(P::NETWORK_ID, decode_boxed::<P>);
    }

    /// Register a user packet type.
    ///
    /// Core ids and ids that are already taken are refused.
    pub fn register<P: PacketType>(&mut self) -> Result<(), SocketError> {
        if P::NETWORK_ID < CORE_ID_LIMIT {
            return Err(SocketError::Configuration(format!(
                "packet id {:#x} is reserved for core packets",
                P::NETWORK_ID
            )));
        }
        if self.decoders.contains_key(&P::NETWORK_ID) {
            return Err(SocketError::Configuration(format!(
                "packet id {:#x} is already registered",
                P::NETWORK_ID
            )));
        }
        self.insert::<P>();
        Ok(())
    }

    pub fn is_registered(&self, id: u32) -> bool {
        self.decoders.contains_key(&id)
    }

    /// Decode a raw inbound buffer into the registered type for its id.
    pub fn decode(&self, raw: &[u8]) -> Result<Decoded<Box<dyn Packet>>, SocketError> {
        let id = peek_id(raw).ok_or(SocketError::Truncated {
            needed: crate::packet::ID_SIZE,
            remaining: raw.len(),
        })?;

        match self.decoders.get(&id) {
            Some(decode) => decode(raw),
            None => {
                let mut reader = PacketReader::new(&raw[crate::packet::ID_SIZE..]);
                let mut packet = GenericPacket::new(id, Vec::new());
                packet.decode_payload(&mut reader)?;
                Ok(Decoded {
                    packet: Box::new(packet),
                    unread: 0,
                })
            }
        }
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
