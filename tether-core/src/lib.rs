//! # tether-core
//!
//! Persistent, authenticated TLS link between a long-running host process
//! and a remote control node.
//!
//! This crate contains:
//! - **Packets**: `Packet`, `EncodedPacket` and the core catalogue (login, disconnect, keep-alive, generic)
//! - **Registry**: `PacketRegistry`, id → decoder, unknown ids as `GenericPacket`
//! - **Events**: `EventDispatcher` with blacklist/whitelist listeners
//! - **Codec**: length-prefixed framing and `FrameReassembler`
//! - **Network**: `ConnectionEngine` (TLS, backoff, authentication gating)
//! - **Worker**: the network thread and its two cross-thread queues
//! - **Session**: `Session`, the host-thread facade
//! - **Config**: `Settings`, loaded from TOML
//! - **Error**: `SocketError`, typed and `thiserror`-based

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod packet;
pub mod registry;
pub mod session;
pub mod state;
pub mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{FrameCodec, FrameReassembler, MAX_PAYLOAD_SIZE, MAX_WRITE_SIZE};
pub use config::{AuthenticationSettings, Settings};
pub use error::SocketError;
pub use event::{EventDispatcher, FilterMode, ListenerId, ListenerResult};
pub use network::{BACKOFF_STAGES, ConnectionEngine, Dialer, TlsDialer};
pub use packet::{
    CoreId, Decoded, DisconnectPacket, DisconnectReason, EncodedPacket, GenericPacket,
    KeepAlivePacket, LoginPacket, Packet, PacketReader, PacketType,
};
pub use registry::PacketRegistry;
pub use session::Session;
pub use state::{ConnectionPhase, ConnectionState};
pub use worker::{NetworkWorker, WakeNotifier};
