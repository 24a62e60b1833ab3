//! Domain-specific error types for the RFB client.
//!
//! All fallible operations return `Result<T, RfbError>`.
//! No panics on malformed server input; every error is typed. "Not enough
//! bytes yet" is never an error; it is reported as a `false`/wait result by
//! the code that needs the bytes.

use thiserror::Error;

/// The canonical error type for the RFB client.
#[derive(Debug, Error)]
pub enum RfbError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// The server sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The server announced a protocol version we do not speak.
    #[error("invalid server version {0}")]
    UnsupportedVersion(String),

    /// No security type offered by the server is supported by the client.
    #[error("unsupported security types (types: {0:?})")]
    UnsupportedSecurity(Vec<u8>),

    /// A rect arrived with an encoding we never advertised.
    #[error("unsupported encoding (encoding: {0})")]
    UnsupportedEncoding(i32),

    /// Decoding a rect failed.
    #[error("error decoding rect: {0}")]
    Decode(String),

    // ── Security Errors ──────────────────────────────────────────
    /// The server rejected the authentication attempt.
    #[error("security negotiation failed on {context}{}", .reason.as_ref().map(|r| format!(" (reason: {r})")).unwrap_or_default())]
    SecurityFailure {
        context: &'static str,
        reason: Option<String>,
    },

    // ── Buffer Errors ────────────────────────────────────────────
    /// The receive queue cannot grow enough to hold the incoming data.
    #[error("receive queue buffer exceeded {max} bytes, and the new message could not fit ({size} bytes)")]
    BufferOverflow { size: usize, max: usize },

    /// A wait-for call asked to rewind further than was consumed.
    #[error("cannot back up {requested} bytes (only {available} consumed)")]
    Backtrack { requested: usize, available: usize },

    /// A read went past the buffered data.
    #[error("read of {requested} bytes exceeds {available} buffered bytes")]
    Underflow { requested: usize, available: usize },

    // ── Compression Errors ───────────────────────────────────────
    /// zlib inflate/deflate failed.
    #[error("compression error: {0}")]
    Compression(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The underlying socket reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The transport's background task went away.
    #[error("transport closed")]
    TransportClosed,

    /// An operation was attempted in the wrong connection state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    // ── Caller Errors ────────────────────────────────────────────
    /// A caller-supplied argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl RfbError {
    /// Whether the error must tear down the connection.
    ///
    /// Caller mistakes are reported back without touching the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidArgument(_) | Self::InvalidState(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RfbError {
    fn from(s: String) -> Self {
        RfbError::Other(s)
    }
}

impl From<&str> for RfbError {
    fn from(s: &str) -> Self {
        RfbError::Other(s.to_string())
    }
}

impl From<flate2::DecompressError> for RfbError {
    fn from(e: flate2::DecompressError) -> Self {
        RfbError::Compression(e.to_string())
    }
}

impl From<flate2::CompressError> for RfbError {
    fn from(e: flate2::CompressError) -> Self {
        RfbError::Compression(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RfbError::BufferOverflow {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = RfbError::SecurityFailure {
            context: "security result",
            reason: Some("bad password".into()),
        };
        assert_eq!(
            e.to_string(),
            "security negotiation failed on security result (reason: bad password)"
        );

        let e = RfbError::SecurityFailure {
            context: "no security types",
            reason: None,
        };
        assert_eq!(e.to_string(), "security negotiation failed on no security types");
    }

    #[test]
    fn from_string() {
        let e: RfbError = "something broke".into();
        assert!(matches!(e, RfbError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RfbError = io_err.into();
        assert!(matches!(e, RfbError::Connection(_)));
    }

    #[test]
    fn caller_errors_are_not_fatal() {
        assert!(!RfbError::InvalidArgument("quality".into()).is_fatal());
        assert!(RfbError::ProtocolViolation("x".into()).is_fatal());
    }
}
