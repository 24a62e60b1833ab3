//! # rfb-core
//!
//! Client core for the Remote Framebuffer protocol (RFB, the VNC wire
//! protocol), built to be fed arbitrarily fragmented input.
//!
//! This crate contains:
//! - **Channel**: `ByteChannel`, a growable receive buffer with backtracking
//!   reads and a batched send queue
//! - **Handshake**: version, security and authentication negotiation up to
//!   ServerInit, resumable at any byte boundary
//! - **Decoders**: Raw, CopyRect, RRE, Hextile, Tight and TightPNG behind the
//!   `RectDecoder` trait
//! - **Session**: `Session`, the connection state machine, message dispatch
//!   and the client control surface
//! - **Display**: the `Display` drawing sink and an in-memory `Framebuffer`
//! - **Transport**: the `Transport` boundary, `MemoryTransport` for tests and a
//!   tokio-backed `TcpTransport` with a `drive` loop
//! - **Error**: `RfbError`, typed, `thiserror`-based error hierarchy

pub mod channel;
pub mod cipher;
pub mod clipboard;
pub mod config;
pub mod credentials;
pub mod decoder;
pub mod display;
pub mod encodings;
pub mod error;
pub mod handshake;
pub mod message;
pub mod network;
pub mod session;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::ByteChannel;
pub use config::{ChannelConfig, SessionConfig};
pub use credentials::{
    CredentialFields, CredentialProvider, Credentials, NoCredentials, StaticCredentials,
};
pub use decoder::{Rect, RectDecoder};
pub use display::{Color, Display, FlushSignal, Framebuffer, ImageKind};
pub use encodings::Encoding;
pub use error::RfbError;
pub use handshake::{Handshake, HandshakeState, ProtocolVersion};
pub use network::{DISCONNECT_TIMEOUT, TcpTransport, drive};
pub use session::{Capabilities, CursorImage, Session, SessionEvent};
pub use state::ConnectionState;
pub use transport::{MemoryTransport, Transport, TransportEvent};
