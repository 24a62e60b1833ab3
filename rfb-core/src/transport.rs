//! Byte-stream transport boundary.
//!
//! The session never performs I/O itself. A [`Transport`] accepts outbound
//! buffers and reports what happened on the wire as [`TransportEvent`]s,
//! which the owner of the session feeds back through
//! [`Session::handle_transport_event`](crate::Session::handle_transport_event).

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::RfbError;

/// Something that carries raw RFB bytes to and from the server.
pub trait Transport {
    /// Start opening a connection to `url`. Completion is reported later
    /// as [`TransportEvent::Open`].
    fn open(&mut self, url: &str) -> Result<(), RfbError>;

    /// Close the connection. A [`TransportEvent::Close`] follows.
    fn close(&mut self);

    /// Queue one opaque write.
    fn send(&mut self, data: &[u8]) -> Result<(), RfbError>;

    /// Whether writes are currently accepted.
    fn is_open(&self) -> bool;
}

/// Discrete notifications coming up from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// A chunk of bytes arrived. Chunk boundaries carry no meaning.
    Message(Bytes),
    /// The connection closed.
    Close { code: Option<u16>, reason: String },
    /// The transport hit an error; a `Close` normally follows.
    Error(String),
}

// ── MemoryTransport ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    url: Option<String>,
    open: bool,
    closed: bool,
    written: Vec<u8>,
    writes: usize,
}

/// In-process transport that records every write.
///
/// Clones share the same state, so a caller can keep a handle after
/// moving one into a session.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The URL passed to the last `open`.
    pub fn url(&self) -> Option<String> {
        self.state.borrow().url.clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Number of distinct `send` calls so far.
    pub fn write_count(&self) -> usize {
        self.state.borrow().writes
    }

    /// Drain everything written since the last call.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().written)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, url: &str) -> Result<(), RfbError> {
        let mut state = self.state.borrow_mut();
        state.url = Some(url.to_string());
        state.open = true;
        state.closed = false;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.open = false;
        state.closed = true;
    }

    fn send(&mut self, data: &[u8]) -> Result<(), RfbError> {
        let mut state = self.state.borrow_mut();
        if !state.open {
            return Err(RfbError::TransportClosed);
        }
        state.written.extend_from_slice(data);
        state.writes += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.borrow().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_written_bytes() {
        let handle = MemoryTransport::new();
        let mut t = handle.clone();
        t.open("vnc://example:5900").unwrap();
        t.send(b"RFB").unwrap();
        t.send(b" 003.008\n").unwrap();
        assert_eq!(handle.write_count(), 2);
        assert_eq!(handle.take_written(), b"RFB 003.008\n");
        assert!(handle.take_written().is_empty());
        assert_eq!(handle.url().as_deref(), Some("vnc://example:5900"));
    }

    #[test]
    fn send_after_close_fails() {
        let mut t = MemoryTransport::new();
        t.open("x").unwrap();
        t.close();
        assert!(t.is_closed());
        assert!(matches!(t.send(b"a"), Err(RfbError::TransportClosed)));
    }
}
