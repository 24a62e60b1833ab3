//! Rectangle encodings and pseudo-encodings.
//!
//! Uses a `repr(i32)` enum with `TryFrom`, so unknown ids surface as errors
//! instead of panics. Quality and compression hints are ranges rather than
//! single ids and are kept as plain constants.

use std::fmt;

use crate::error::RfbError;

/// Base of the JPEG quality hint range (`QUALITY_LEVEL_0 + level`).
pub const QUALITY_LEVEL_0: i32 = -32;
/// Base of the zlib compression hint range (`COMPRESS_LEVEL_0 + level`).
pub const COMPRESS_LEVEL_0: i32 = -256;

// ── Encoding ─────────────────────────────────────────────────────

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    // ── Pixel data ───────────────────────────────────────────────
    Raw = 0,
    CopyRect = 1,
    Rre = 2,
    Hextile = 5,
    Tight = 7,
    TightPng = -260,

    // ── Pseudo-encodings ─────────────────────────────────────────
    DesktopSize = -223,
    LastRect = -224,
    Cursor = -239,
    QemuExtendedKeyEvent = -258,
    DesktopName = -307,
    ExtendedDesktopSize = -308,
    Xvp = -309,
    Fence = -312,
    ContinuousUpdates = -313,
    VmwareCursor = 0x574d_5664,
    ExtendedClipboard = 0xc0a1_e5ce_u32 as i32,
}

impl TryFrom<i32> for Encoding {
    type Error = RfbError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        const EXTENDED_CLIPBOARD: i32 = Encoding::ExtendedClipboard as i32;
        match value {
            0 => Ok(Encoding::Raw),
            1 => Ok(Encoding::CopyRect),
            2 => Ok(Encoding::Rre),
            5 => Ok(Encoding::Hextile),
            7 => Ok(Encoding::Tight),
            -260 => Ok(Encoding::TightPng),

            -223 => Ok(Encoding::DesktopSize),
            -224 => Ok(Encoding::LastRect),
            -239 => Ok(Encoding::Cursor),
            -258 => Ok(Encoding::QemuExtendedKeyEvent),
            -307 => Ok(Encoding::DesktopName),
            -308 => Ok(Encoding::ExtendedDesktopSize),
            -309 => Ok(Encoding::Xvp),
            -312 => Ok(Encoding::Fence),
            -313 => Ok(Encoding::ContinuousUpdates),
            0x574d_5664 => Ok(Encoding::VmwareCursor),
            EXTENDED_CLIPBOARD => Ok(Encoding::ExtendedClipboard),

            _ => Err(RfbError::UnknownVariant {
                type_name: "Encoding",
                value: value as u32 as u64,
            }),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Encoding {
    /// Wire value.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Returns `true` for ids that carry pixel data.
    pub fn is_pixel_data(self) -> bool {
        matches!(
            self,
            Encoding::Raw
                | Encoding::CopyRect
                | Encoding::Rre
                | Encoding::Hextile
                | Encoding::Tight
                | Encoding::TightPng
        )
    }
}

/// The SetEncodings list in preference order.
///
/// At 8-bit depth only CopyRect and Raw are offered, and no cursor
/// pseudo-encodings.
pub fn preferred_encodings(depth: u8, quality_level: u8, compression_level: u8) -> Vec<i32> {
    let full_color = depth == 24;
    let mut encs = vec![Encoding::CopyRect.id()];

    if full_color {
        encs.extend([
            Encoding::Tight.id(),
            Encoding::TightPng.id(),
            Encoding::Hextile.id(),
            Encoding::Rre.id(),
        ]);
    }
    encs.push(Encoding::Raw.id());

    encs.push(QUALITY_LEVEL_0 + i32::from(quality_level));
    encs.push(COMPRESS_LEVEL_0 + i32::from(compression_level));
    encs.extend(
        [
            Encoding::DesktopSize,
            Encoding::LastRect,
            Encoding::QemuExtendedKeyEvent,
            Encoding::ExtendedDesktopSize,
            Encoding::Xvp,
            Encoding::Fence,
            Encoding::ContinuousUpdates,
            Encoding::DesktopName,
            Encoding::ExtendedClipboard,
        ]
        .map(Encoding::id),
    );

    if full_color {
        encs.extend([Encoding::VmwareCursor.id(), Encoding::Cursor.id()]);
    }
    encs
}
