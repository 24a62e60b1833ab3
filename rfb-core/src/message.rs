//! RFB message vocabulary: server message ids, security types, the pixel
//! format, and builders for every client-to-server message.
//!
//! Uses proper enums with `TryFrom`; unknown values are errors, not panics.

use std::fmt;

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use crate::error::RfbError;

// ── ServerMessage ────────────────────────────────────────────────

/// Message types the server may send once the connection is established.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerMessage {
    FramebufferUpdate = 0,
    SetColorMapEntries = 1,
    Bell = 2,
    ServerCutText = 3,
    EndOfContinuousUpdates = 150,
    ServerFence = 248,
    Xvp = 250,
}

impl TryFrom<u8> for ServerMessage {
    type Error = RfbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServerMessage::FramebufferUpdate),
            1 => Ok(ServerMessage::SetColorMapEntries),
            2 => Ok(ServerMessage::Bell),
            3 => Ok(ServerMessage::ServerCutText),
            150 => Ok(ServerMessage::EndOfContinuousUpdates),
            248 => Ok(ServerMessage::ServerFence),
            250 => Ok(ServerMessage::Xvp),
            _ => Err(RfbError::UnknownVariant {
                type_name: "ServerMessage",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Client message ids ───────────────────────────────────────────

pub const SET_PIXEL_FORMAT: u8 = 0;
pub const SET_ENCODINGS: u8 = 2;
pub const FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
pub const KEY_EVENT: u8 = 4;
pub const POINTER_EVENT: u8 = 5;
pub const CLIENT_CUT_TEXT: u8 = 6;
pub const ENABLE_CONTINUOUS_UPDATES: u8 = 150;
pub const CLIENT_FENCE: u8 = 248;
pub const XVP: u8 = 250;
pub const SET_DESKTOP_SIZE: u8 = 251;
pub const QEMU: u8 = 255;

// ── SecurityType ─────────────────────────────────────────────────

/// Security types and Tight sub-authentication schemes the client knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityType {
    None,
    VncAuth,
    Tight,
    VeNCrypt,
    Xvp,
    /// Tight Unix login, only reachable as a Tight sub-authentication.
    TightUnixLogin,
    /// Anything else the server announced.
    Other(u32),
}

impl SecurityType {
    /// Selection order when the server offers a list.
    pub const PREFERENCE: [SecurityType; 5] = [
        SecurityType::None,
        SecurityType::Xvp,
        SecurityType::Tight,
        SecurityType::VncAuth,
        SecurityType::VeNCrypt,
    ];

    pub fn code(self) -> u32 {
        match self {
            SecurityType::None => 1,
            SecurityType::VncAuth => 2,
            SecurityType::Tight => 16,
            SecurityType::VeNCrypt => 19,
            SecurityType::Xvp => 22,
            SecurityType::TightUnixLogin => 129,
            SecurityType::Other(code) => code,
        }
    }

    /// Pick the most preferred type out of a server's list.
    pub fn choose(offered: &[u8]) -> Option<SecurityType> {
        Self::PREFERENCE
            .into_iter()
            .find(|t| offered.iter().any(|&o| u32::from(o) == t.code()))
    }
}

impl From<u32> for SecurityType {
    fn from(code: u32) -> Self {
        match code {
            1 => SecurityType::None,
            2 => SecurityType::VncAuth,
            16 => SecurityType::Tight,
            19 => SecurityType::VeNCrypt,
            22 => SecurityType::Xvp,
            129 => SecurityType::TightUnixLogin,
            other => SecurityType::Other(other),
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

// ── Fence ────────────────────────────────────────────────────────

bitflags! {
    /// Fence message flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FenceFlags: u32 {
        const BLOCK_BEFORE = 1 << 0;
        const BLOCK_AFTER  = 1 << 1;
        const SYNC_NEXT    = 1 << 2;
        const REQUEST      = 1 << 31;
    }
}

/// Longest fence payload that will be echoed back.
pub const MAX_FENCE_PAYLOAD: usize = 64;

// ── PixelFormat ──────────────────────────────────────────────────

/// The 16-byte PIXEL_FORMAT structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Little-endian true-color layout for `depth` (24 → 32 bpp 8:8:8,
    /// 8 → 8 bpp 2:2:2).
    pub fn true_color(depth: u8) -> Self {
        let bits_per_pixel = match depth {
            d if d > 16 => 32,
            d if d > 8 => 16,
            _ => 8,
        };
        let bits = depth / 3;
        let max = (1u16 << bits) - 1;
        Self {
            bits_per_pixel,
            depth,
            big_endian: false,
            true_color: true,
            red_max: max,
            green_max: max,
            blue_max: max,
            red_shift: bits * 2,
            green_shift: bits,
            blue_shift: 0,
        }
    }

    /// Parse the 16 wire bytes (including the 3 padding bytes).
    pub fn from_bytes(b: &[u8; 16]) -> Self {
        Self {
            bits_per_pixel: b[0],
            depth: b[1],
            big_endian: b[2] != 0,
            true_color: b[3] != 0,
            red_max: u16::from_be_bytes([b[4], b[5]]),
            green_max: u16::from_be_bytes([b[6], b[7]]),
            blue_max: u16::from_be_bytes([b[8], b[9]]),
            red_shift: b[10],
            green_shift: b[11],
            blue_shift: b[12],
        }
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian as u8);
        buf.put_u8(self.true_color as u8);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3);
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bpp: {}, depth: {}, bigEndian: {}, trueColor: {}, max: {}/{}/{}, shift: {}/{}/{}",
            self.bits_per_pixel,
            self.depth,
            self.big_endian,
            self.true_color,
            self.red_max,
            self.green_max,
            self.blue_max,
            self.red_shift,
            self.green_shift,
            self.blue_shift
        )
    }
}

// ── Client message builders ──────────────────────────────────────

pub fn set_pixel_format(format: &PixelFormat) -> BytesMut {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u8(SET_PIXEL_FORMAT);
    buf.put_bytes(0, 3);
    format.put(&mut buf);
    buf
}

pub fn set_encodings(encodings: &[i32]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + 4 * encodings.len());
    buf.put_u8(SET_ENCODINGS);
    buf.put_u8(0);
    buf.put_u16(encodings.len() as u16);
    for &enc in encodings {
        buf.put_i32(enc);
    }
    buf
}

pub fn framebuffer_update_request(incremental: bool, x: u16, y: u16, w: u16, h: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(FRAMEBUFFER_UPDATE_REQUEST);
    buf.put_u8(incremental as u8);
    buf.put_u16(x);
    buf.put_u16(y);
    buf.put_u16(w);
    buf.put_u16(h);
    buf
}

pub fn key_event(keysym: u32, down: bool) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(KEY_EVENT);
    buf.put_u8(down as u8);
    buf.put_u16(0);
    buf.put_u32(keysym);
    buf
}

/// XT scancodes in the `0xE0xx` range are sent as `xx | 0x80`.
pub fn qemu_keycode(scancode: u32) -> u32 {
    let upper = scancode >> 8;
    let lower = scancode & 0xff;
    if upper == 0xe0 && lower < 0x7f {
        lower | 0x80
    } else {
        scancode
    }
}

pub fn qemu_extended_key_event(keysym: u32, down: bool, scancode: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u8(QEMU);
    buf.put_u8(0);
    buf.put_u16(down as u16);
    buf.put_u32(keysym);
    buf.put_u32(qemu_keycode(scancode));
    buf
}

pub fn pointer_event(x: u16, y: u16, button_mask: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(POINTER_EVENT);
    buf.put_u8(button_mask);
    buf.put_u16(x);
    buf.put_u16(y);
    buf
}

/// ClientCutText. Extended clipboard payloads carry a negated length.
pub fn client_cut_text(data: &[u8], extended: bool) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8 + data.len());
    buf.put_u8(CLIENT_CUT_TEXT);
    buf.put_bytes(0, 3);
    let len = data.len() as i32;
    buf.put_i32(if extended { -len } else { len });
    buf.put_slice(data);
    buf
}

pub fn set_desktop_size(width: u16, height: u16, screen_id: u32, screen_flags: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_u8(SET_DESKTOP_SIZE);
    buf.put_u8(0);
    buf.put_u16(width);
    buf.put_u16(height);
    buf.put_u8(1); // number-of-screens
    buf.put_u8(0);
    buf.put_u32(screen_id);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(width);
    buf.put_u16(height);
    buf.put_u32(screen_flags);
    buf
}

pub fn client_fence(flags: FenceFlags, payload: &[u8]) -> BytesMut {
    let payload = &payload[..payload.len().min(MAX_FENCE_PAYLOAD)];
    let mut buf = BytesMut::with_capacity(9 + payload.len());
    buf.put_u8(CLIENT_FENCE);
    buf.put_bytes(0, 3);
    buf.put_u32(flags.bits());
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
    buf
}

pub fn enable_continuous_updates(enable: bool, x: u16, y: u16, w: u16, h: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(ENABLE_CONTINUOUS_UPDATES);
    buf.put_u8(enable as u8);
    buf.put_u16(x);
    buf.put_u16(y);
    buf.put_u16(w);
    buf.put_u16(h);
    buf
}

pub fn xvp_op(version: u8, op: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8(XVP);
    buf.put_u8(0);
    buf.put_u8(version);
    buf.put_u8(op);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_roundtrip() {
        for msg in [
            ServerMessage::FramebufferUpdate,
            ServerMessage::Bell,
            ServerMessage::EndOfContinuousUpdates,
            ServerMessage::Xvp,
        ] {
            assert_eq!(ServerMessage::try_from(msg as u8).unwrap(), msg);
        }
        assert!(ServerMessage::try_from(4).is_err());
    }

    #[test]
    fn security_preference_ignores_list_order() {
        assert_eq!(SecurityType::choose(&[2, 1]), Some(SecurityType::None));
        assert_eq!(SecurityType::choose(&[19, 2, 16]), Some(SecurityType::Tight));
        assert_eq!(SecurityType::choose(&[2, 22]), Some(SecurityType::Xvp));
        assert_eq!(SecurityType::choose(&[5, 6]), None);
    }

    #[test]
    fn depth_24_pixel_format() {
        let msg = set_pixel_format(&PixelFormat::true_color(24));
        assert_eq!(
            &msg[..],
            &[0, 0, 0, 0, 32, 24, 0, 1, 0, 255, 0, 255, 0, 255, 16, 8, 0, 0, 0, 0]
        );
    }

    #[test]
    fn depth_8_pixel_format() {
        let pf = PixelFormat::true_color(8);
        assert_eq!(pf.bits_per_pixel, 8);
        assert_eq!(pf.red_max, 3);
        assert_eq!((pf.red_shift, pf.green_shift, pf.blue_shift), (4, 2, 0));
    }

    #[test]
    fn pixel_format_parse() {
        let mut buf = BytesMut::new();
        PixelFormat::true_color(24).put(&mut buf);
        let bytes: [u8; 16] = buf[..].try_into().unwrap();
        assert_eq!(PixelFormat::from_bytes(&bytes), PixelFormat::true_color(24));
    }

    #[test]
    fn qemu_keycode_mapping() {
        assert_eq!(qemu_keycode(0xe053), 0xd3);
        assert_eq!(qemu_keycode(0x1d), 0x1d);
        assert_eq!(qemu_keycode(0xe07f), 0xe07f);
        let msg = qemu_extended_key_event(0xffff, true, 0xe053);
        assert_eq!(&msg[..], &[255, 0, 0, 1, 0, 0, 0xff, 0xff, 0, 0, 0, 0xd3]);
    }

    #[test]
    fn extended_cut_text_negates_length() {
        let msg = client_cut_text(&[1, 2, 3, 4], true);
        assert_eq!(&msg[..8], &[6, 0, 0, 0, 0xff, 0xff, 0xff, 0xfc]);
        let msg = client_cut_text(b"hi", false);
        assert_eq!(&msg[..], &[6, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn fence_payload_is_capped() {
        let msg = client_fence(FenceFlags::BLOCK_BEFORE, &[7u8; 100]);
        assert_eq!(msg.len(), 9 + MAX_FENCE_PAYLOAD);
        assert_eq!(msg[8], 64);
    }

    #[test]
    fn set_desktop_size_layout() {
        let msg = set_desktop_size(1024, 768, 0x0102_0304, 0);
        assert_eq!(msg.len(), 24);
        assert_eq!(&msg[..8], &[251, 0, 4, 0, 3, 0, 1, 0]);
        assert_eq!(&msg[8..12], &[1, 2, 3, 4]);
        assert_eq!(&msg[16..20], &[4, 0, 3, 0]);
    }
}
