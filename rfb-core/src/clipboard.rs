//! Extended clipboard pseudo-messages.
//!
//! An extended clipboard message travels inside Server/ClientCutText with a
//! negative length. Its payload starts with a 32-bit flag word:
//!
//! | Bits   | Meaning                                     |
//! |--------|---------------------------------------------|
//! | 24..28 | action (caps, request, peek, notify, provide)|
//! | 0..15  | formats (bit 0 = text)                      |
//!
//! `caps` is followed by one 4-byte size per advertised format. `provide` is
//! followed by one zlib stream holding, for each format, a 4-byte length and
//! the data. Only the text format is ever produced or consumed here.

use std::io::{Read, Write};

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::RfbError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClipboardActions: u32 {
        const CAPS    = 1 << 24;
        const REQUEST = 1 << 25;
        const PEEK    = 1 << 26;
        const NOTIFY  = 1 << 27;
        const PROVIDE = 1 << 28;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClipboardFormats: u32 {
        const TEXT  = 1 << 0;
        const RTF   = 1 << 1;
        const HTML  = 1 << 2;
        const DIB   = 1 << 3;
        const FILES = 1 << 4;
    }
}

const ACTION_MASK: u32 = 0xff00_0000;
const FORMAT_MASK: u32 = 0x0000_ffff;

/// One decoded extended clipboard message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedClipboard<'a> {
    pub actions: ClipboardActions,
    pub formats: ClipboardFormats,
    /// Everything after the flag word.
    pub body: &'a [u8],
}

impl<'a> ExtendedClipboard<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, RfbError> {
        let Some((head, body)) = payload.split_first_chunk::<4>() else {
            return Err(RfbError::ProtocolViolation(format!(
                "extended clipboard message of {} bytes has no flags",
                payload.len()
            )));
        };
        let flags = u32::from_be_bytes(*head);
        Ok(Self {
            actions: ClipboardActions::from_bits_retain(flags & ACTION_MASK),
            formats: ClipboardFormats::from_bits_retain(flags & FORMAT_MASK),
            body,
        })
    }

    /// Format sizes announced by a `caps` message, in bit order.
    pub fn caps_sizes(&self) -> Vec<(ClipboardFormats, u32)> {
        format_bits(self.formats)
            .zip(self.body.chunks_exact(4))
            .map(|(f, size)| (f, u32::from_be_bytes([size[0], size[1], size[2], size[3]])))
            .collect()
    }

    /// Inflate a `provide` body and return the text entry, if present.
    pub fn provided_text(&self) -> Result<Option<String>, RfbError> {
        let mut raw = Vec::new();
        ZlibDecoder::new(self.body)
            .read_to_end(&mut raw)
            .map_err(|e| RfbError::Compression(e.to_string()))?;

        let mut rest = raw.as_slice();
        let mut text = None;
        for format in format_bits(self.formats) {
            let Some((len, tail)) = rest.split_first_chunk::<4>() else {
                return Err(RfbError::ProtocolViolation(
                    "truncated extended clipboard provide".into(),
                ));
            };
            let len = u32::from_be_bytes(*len) as usize;
            if tail.len() < len {
                return Err(RfbError::ProtocolViolation(
                    "truncated extended clipboard provide".into(),
                ));
            }
            let (chunk, tail) = tail.split_at(len);
            if format == ClipboardFormats::TEXT {
                text = Some(decode_text(chunk));
            }
            rest = tail;
        }
        Ok(text)
    }
}

fn format_bits(formats: ClipboardFormats) -> impl Iterator<Item = ClipboardFormats> {
    (0..16)
        .map(|i| ClipboardFormats::from_bits_retain(1 << i))
        .filter(move |f| formats.contains(*f))
}

/// Received text: a trailing NUL is dropped and CRLF becomes LF. A lone CR
/// is passed through unchanged, as servers only ever send CRLF.
fn decode_text(chunk: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(chunk).into_owned();
    if text.ends_with('\0') {
        text.pop();
    }
    text.replace("\r\n", "\n")
}

/// Turn lone CR, lone LF and CRLF into CRLF.
pub fn normalize_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    out
}

fn flags(actions: ClipboardActions, formats: ClipboardFormats) -> [u8; 4] {
    [(actions.bits() >> 24) as u8, 0, 0, formats.bits() as u8]
}

// ── Outbound payloads ────────────────────────────────────────────

/// The client's own capabilities: every action, text only, no size limit.
pub fn caps_payload() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_slice(&flags(ClipboardActions::all(), ClipboardFormats::TEXT));
    buf.put_u32(0);
    buf.to_vec()
}

pub fn notify_payload(formats: ClipboardFormats) -> Vec<u8> {
    flags(ClipboardActions::NOTIFY, formats).to_vec()
}

pub fn request_payload(formats: ClipboardFormats) -> Vec<u8> {
    flags(ClipboardActions::REQUEST, formats).to_vec()
}

/// A `provide` message carrying `text` as CRLF-terminated, NUL-terminated
/// UTF-8.
pub fn provide_payload(text: &str) -> Result<Vec<u8>, RfbError> {
    let mut data = normalize_crlf(text).into_bytes();
    data.push(0);

    let mut raw = BytesMut::with_capacity(4 + data.len());
    raw.put_u32(data.len() as u32);
    raw.put_slice(&data);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| RfbError::Compression(e.to_string()))?;
    let deflated = encoder
        .finish()
        .map_err(|e| RfbError::Compression(e.to_string()))?;

    let mut out = flags(ClipboardActions::PROVIDE, ClipboardFormats::TEXT).to_vec();
    out.extend_from_slice(&deflated);
    Ok(out)
}
