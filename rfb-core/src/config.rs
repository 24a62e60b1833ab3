//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::RfbError;

/// Highest value accepted for the quality and compression hints.
pub const MAX_LEVEL: u8 = 9;

/// Per-connection settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ask the server to leave other clients connected.
    pub shared: bool,
    /// ID sent to an UltraVNC repeater (without the `ID:` prefix).
    pub repeater_id: String,
    /// Suppress all input and clipboard traffic.
    pub view_only: bool,
    /// JPEG quality hint, 0–9.
    pub quality_level: u8,
    /// zlib compression hint, 0–9.
    pub compression_level: u8,
    /// Socket buffer sizing.
    pub channel: ChannelConfig,
}

/// Sizing of the [`ByteChannel`](crate::ByteChannel) queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Initial receive queue size in bytes.
    pub receive_buffer_size: usize,
    /// Hard ceiling the receive queue may grow to.
    pub max_receive_buffer_size: usize,
    /// Send queue size; larger payloads are split into writes of this size.
    pub send_buffer_size: usize,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shared: true,
            repeater_id: String::new(),
            view_only: false,
            quality_level: 6,
            compression_level: 2,
            channel: ChannelConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: 4 * 1024 * 1024,
            max_receive_buffer_size: 40 * 1024 * 1024,
            send_buffer_size: 10 * 1024,
        }
    }
}

// ── Validation ───────────────────────────────────────────────────

impl SessionConfig {
    /// Reject out-of-range levels and nonsensical buffer sizes.
    pub fn validate(&self) -> Result<(), RfbError> {
        check_level("quality_level", self.quality_level)?;
        check_level("compression_level", self.compression_level)?;
        self.channel.validate()
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), RfbError> {
        if self.receive_buffer_size == 0 || self.send_buffer_size == 0 {
            return Err(RfbError::InvalidArgument(
                "buffer sizes must be non-zero".into(),
            ));
        }
        if self.max_receive_buffer_size < self.receive_buffer_size {
            return Err(RfbError::InvalidArgument(format!(
                "max_receive_buffer_size {} is below receive_buffer_size {}",
                self.max_receive_buffer_size, self.receive_buffer_size
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_level(name: &str, level: u8) -> Result<(), RfbError> {
    if level > MAX_LEVEL {
        return Err(RfbError::InvalidArgument(format!(
            "{name} must be an integer between 0 and {MAX_LEVEL}"
        )));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
