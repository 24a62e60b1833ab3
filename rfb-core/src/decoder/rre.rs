//! RRE encoding: a background colour followed by solid sub-rects.

use crate::channel::ByteChannel;
use crate::decoder::{Rect, RectDecoder};
use crate::display::Display;
use crate::error::RfbError;

const HEADER_LEN: usize = 4 + 4;
const SUBRECT_LEN: usize = 4 + 8;

#[derive(Debug, Default)]
pub struct RreDecoder {
    /// Sub-rects still to read in the current rect.
    subrects: u32,
}

impl RectDecoder for RreDecoder {
    fn decode_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        _depth: u8,
    ) -> Result<bool, RfbError> {
        if self.subrects == 0 {
            if chan.wait_for(HEADER_LEN, 0)? {
                return Ok(false);
            }
            self.subrects = chan.shift_u32()?;
            let background = chan.shift_array::<4>()?;
            display.fill_rect(rect.x, rect.y, rect.width, rect.height, background);
        }

        while self.subrects > 0 {
            if chan.wait_for(SUBRECT_LEN, 0)? {
                return Ok(false);
            }
            let color = chan.shift_array::<4>()?;
            let x = chan.shift_u16()?;
            let y = chan.shift_u16()?;
            let w = chan.shift_u16()?;
            let h = chan.shift_u16()?;
            display.fill_rect(
                rect.x.saturating_add(x),
                rect.y.saturating_add(y),
                w,
                h,
                color,
            );
            self.subrects -= 1;
        }
        Ok(true)
    }
}
