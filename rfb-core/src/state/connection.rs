//! Session connection state machine.
//!
//! Provides a `ConnectionState` enum that models the full lifecycle of one
//! RFB session, with validated transitions that return `Result` instead of
//! panicking. The handshake lives inside the `Connecting` variant, so
//! handshake data cannot be reached once the session is connected.

use std::fmt;
use std::time::Instant;

use crate::error::RfbError;
use crate::handshake::Handshake;

// ── ConnectionState ──────────────────────────────────────────────

/// ```text
///  Idle ──► Connecting ──► Connected
///               │              │
///               ▼              ▼
///            Disconnecting ◄───┘
///               │
///               ▼
///          Disconnected   (terminal)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, `connect` not called yet.
    #[default]
    Idle,

    /// Transport opening or handshake in progress.
    Connecting(Box<Handshake>),

    /// ServerInit received; normal message processing.
    Connected {
        /// When the connection entered the `Connected` state.
        since: Instant,
    },

    /// Transport close requested, waiting for it to report closed.
    Disconnecting,

    /// Finished. No further transitions are possible.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ConnectionState {
    /// Lower-case state name; empty for `Idle`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Connecting(_) => "connecting",
            Self::Connected { .. } => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }

    /// Returns `true` when the connection is fully established and
    /// ready for protocol traffic.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnecting(&self) -> bool {
        matches!(self, Self::Disconnecting)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the connection has been in the `Connected` state.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        match self {
            Self::Connecting(hs) => Some(hs),
            _ => None,
        }
    }

    pub fn handshake_mut(&mut self) -> Option<&mut Handshake> {
        match self {
            Self::Connecting(hs) => Some(hs),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_connect(&mut self, handshake: Handshake) -> Result<(), RfbError> {
        match self {
            Self::Idle => {
                *self = Self::Connecting(Box::new(handshake));
                Ok(())
            }
            other => Err(bad_transition("connecting", other)),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_handshake(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Connecting(_) => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(bad_transition("connected", other)),
        }
    }

    /// Valid from: `Connecting`, `Connected`.
    pub fn begin_disconnect(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Connecting(_) | Self::Connected { .. } => {
                *self = Self::Disconnecting;
                Ok(())
            }
            other => Err(bad_transition("disconnecting", other)),
        }
    }

    /// Valid from: `Idle`. Nothing was opened, so there is nothing to close.
    pub fn abandon(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Idle => {
                *self = Self::Disconnected;
                Ok(())
            }
            other => Err(bad_transition("disconnected", other)),
        }
    }

    /// Valid from: `Disconnecting`.
    pub fn finish_disconnect(&mut self) -> Result<(), RfbError> {
        match self {
            Self::Disconnecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            other => Err(bad_transition("disconnected", other)),
        }
    }
}

fn bad_transition(to: &str, from: &ConnectionState) -> RfbError {
    RfbError::InvalidState(format!(
        "bad transition to {to} state, previous connection state: '{from}'"
    ))
}

// ── Tests ────────────────────────────────────────────────────────
