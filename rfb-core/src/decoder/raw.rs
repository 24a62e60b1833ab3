//! Raw encoding: `width * height` pixels in the negotiated pixel format.

use crate::channel::ByteChannel;
use crate::decoder::{Rect, RectDecoder};
use crate::display::{BYTES_PER_PIXEL, Display};
use crate::error::RfbError;

#[derive(Debug, Default)]
pub struct RawDecoder;

impl RectDecoder for RawDecoder {
    fn decode_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        depth: u8,
    ) -> Result<bool, RfbError> {
        if rect.is_empty() {
            return Ok(true);
        }

        let pixel_size = if depth == 8 { 1 } else { BYTES_PER_PIXEL };
        let len = rect.area() * pixel_size;
        if chan.wait_for(len, 0)? {
            return Ok(false);
        }

        let data = chan.shift_bytes(len)?;
        if depth == 8 {
            let expanded = expand_bgr222(data);
            display.blit_image(rect.x, rect.y, rect.width, rect.height, &expanded);
        } else {
            display.blit_image(rect.x, rect.y, rect.width, rect.height, data);
        }
        Ok(true)
    }
}

/// 8-bit pixels carry 2 bits per channel, laid out as requested by
/// `PixelFormat::true_color(8)`: blue in bits 0-1, green in 2-3, red in 4-5.
/// Each channel is scaled to 0..=255.
fn expand_bgr222(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * BYTES_PER_PIXEL);
    for &p in data {
        let b = (p & 0x03) * 85;
        let g = ((p >> 2) & 0x03) * 85;
        let r = ((p >> 4) & 0x03) * 85;
        out.extend_from_slice(&[b, g, r, 0]);
    }
    out
}
