//! Rect decoders for the pixel-data encodings.
//!
//! Every decoder is resumable: `decode_rect` returns `Ok(false)` when the
//! buffered bytes run out and is called again with the same rect once more
//! data has arrived. Anything a decoder already drew stays drawn, and any
//! unit it has not finished is left unconsumed in the channel.
//!
//! ## Sub-modules
//!
//! | Module     | Encoding                                        |
//! |------------|-------------------------------------------------|
//! | `raw`      | Raw (0): uncompressed pixels                    |
//! | `copyrect` | CopyRect (1): copy from another framebuffer area |
//! | `rre`      | RRE (2): background plus solid sub-rects        |
//! | `hextile`  | Hextile (5): 16×16 tiles with sub-encodings     |
//! | `tight`    | Tight (7) and TightPNG (-260)                   |

pub mod copyrect;
pub mod hextile;
pub mod raw;
pub mod rre;
pub mod tight;

pub use copyrect::CopyRectDecoder;
pub use hextile::HextileDecoder;
pub use raw::RawDecoder;
pub use rre::RreDecoder;
pub use tight::TightDecoder;

use crate::channel::ByteChannel;
use crate::display::{Color, Display};
use crate::encodings::Encoding;
use crate::error::RfbError;

/// Size of one rect header inside a FramebufferUpdate.
pub const RECT_HEADER_LEN: usize = 12;

/// Header of one rect inside a FramebufferUpdate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rect {
    /// Read a header; the caller has already waited for
    /// [`RECT_HEADER_LEN`] bytes.
    pub fn read(chan: &mut ByteChannel) -> Result<Self, RfbError> {
        Ok(Self {
            x: chan.shift_u16()?,
            y: chan.shift_u16()?,
            width: chan.shift_u16()?,
            height: chan.shift_u16()?,
            encoding: chan.shift_i32()?,
        })
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A resumable decoder for one pixel-data encoding.
pub trait RectDecoder {
    /// Decode as much of `rect` as the buffered bytes allow. Returns
    /// `Ok(true)` once the rect is complete.
    fn decode_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        depth: u8,
    ) -> Result<bool, RfbError>;
}

/// One decoder instance per pixel-data encoding, kept for the whole
/// session so per-encoding state (zlib streams, hextile colours) persists.
#[derive(Default)]
pub struct Decoders {
    raw: RawDecoder,
    copy_rect: CopyRectDecoder,
    rre: RreDecoder,
    hextile: HextileDecoder,
    tight: TightDecoder,
    tight_png: TightDecoder,
}

impl Decoders {
    pub fn new() -> Self {
        Self {
            tight_png: TightDecoder::png(),
            ..Self::default()
        }
    }

    /// Decoder for `encoding`, or `None` if it is not a pixel-data encoding.
    pub fn get_mut(&mut self, encoding: Encoding) -> Option<&mut dyn RectDecoder> {
        match encoding {
            Encoding::Raw => Some(&mut self.raw),
            Encoding::CopyRect => Some(&mut self.copy_rect),
            Encoding::Rre => Some(&mut self.rre),
            Encoding::Hextile => Some(&mut self.hextile),
            Encoding::Tight => Some(&mut self.tight),
            Encoding::TightPng => Some(&mut self.tight_png),
            _ => None,
        }
    }
}

/// Widen packed RGB triplets to BGRX pixels.
pub(crate) fn rgb_to_bgrx(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0], 0]);
    }
    out
}

/// BGRX colour from an RGB triplet.
pub(crate) fn rgb_color(rgb: [u8; 3]) -> Color {
    [rgb[2], rgb[1], rgb[0], 0]
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::channel::ByteChannel;
    use crate::config::ChannelConfig;
    use crate::display::{Color, Display, ImageKind};
    use crate::transport::MemoryTransport;

    /// Display that records every call.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub ops: Vec<Op>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Op {
        Resize(u16, u16),
        Fill(u16, u16, u16, u16, Color),
        Blit(u16, u16, u16, u16, Vec<u8>),
        Copy(u16, u16, u16, u16, u16, u16),
        StartTile(u16, u16, u16, u16, Color),
        SubTile(u8, u8, u8, u8, Color),
        FinishTile,
        Image(u16, u16, u16, u16, ImageKind, Vec<u8>),
        Flip,
    }

    impl Display for Recorder {
        fn resize(&mut self, width: u16, height: u16) {
            self.ops.push(Op::Resize(width, height));
        }
        fn fill_rect(&mut self, x: u16, y: u16, w: u16, h: u16, color: Color) {
            self.ops.push(Op::Fill(x, y, w, h, color));
        }
        fn blit_image(&mut self, x: u16, y: u16, w: u16, h: u16, data: &[u8]) {
            self.ops.push(Op::Blit(x, y, w, h, data.to_vec()));
        }
        fn copy_image(&mut self, sx: u16, sy: u16, x: u16, y: u16, w: u16, h: u16) {
            self.ops.push(Op::Copy(sx, sy, x, y, w, h));
        }
        fn start_tile(&mut self, x: u16, y: u16, w: u16, h: u16, bg: Color) {
            self.ops.push(Op::StartTile(x, y, w, h, bg));
        }
        fn sub_tile(&mut self, x: u8, y: u8, w: u8, h: u8, color: Color) {
            self.ops.push(Op::SubTile(x, y, w, h, color));
        }
        fn finish_tile(&mut self) {
            self.ops.push(Op::FinishTile);
        }
        fn image_rect(&mut self, x: u16, y: u16, w: u16, h: u16, kind: ImageKind, data: &[u8]) {
            self.ops.push(Op::Image(x, y, w, h, kind, data.to_vec()));
        }
        fn flip(&mut self) {
            self.ops.push(Op::Flip);
        }
        fn pending(&self) -> bool {
            false
        }
        fn flush(&mut self) {}
    }

    pub fn channel() -> ByteChannel {
        ByteChannel::new(
            Box::new(MemoryTransport::new()),
            &ChannelConfig {
                receive_buffer_size: 64,
                ..ChannelConfig::default()
            },
        )
    }
}
