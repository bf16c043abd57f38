//! Everything that touches the socket: TLS setup, reconnect schedule,
//! authentication gating and the engine loop tying them together.

pub mod backoff;
pub mod engine;
pub mod gate;
pub mod tls;
pub mod writer;

pub use backoff::{BACKOFF_STAGES, Backoff};
pub use engine::{ConnectionEngine, Dialer};
pub use gate::OutboundGate;
pub use tls::TlsDialer;
pub use writer::FrameWriter;
