//! CopyRect encoding: a 4-byte source position.

use crate::channel::ByteChannel;
use crate::decoder::{Rect, RectDecoder};
use crate::display::Display;
use crate::error::RfbError;

#[derive(Debug, Default)]
pub struct CopyRectDecoder;

impl RectDecoder for CopyRectDecoder {
    fn decode_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        _depth: u8,
    ) -> Result<bool, RfbError> {
        if chan.wait_for(4, 0)? {
            return Ok(false);
        }
        let src_x = chan.shift_u16()?;
        let src_y = chan.shift_u16()?;
        if rect.is_empty() {
            return Ok(true);
        }
        display.copy_image(src_x, src_y, rect.x, rect.y, rect.width, rect.height);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::{Op, Recorder, channel};

    #[test]
    fn copies_from_source() {
        let mut chan = channel();
        let mut display = Recorder::default();
        let rect = Rect {
            x: 10,
            y: 20,
            width: 3,
            height: 4,
            encoding: 1,
        };

        chan.enqueue(&[0, 5]).unwrap();
        assert!(!CopyRectDecoder.decode_rect(&rect, &mut chan, &mut display, 24).unwrap());
        chan.enqueue(&[0, 6]).unwrap();
        assert!(CopyRectDecoder.decode_rect(&rect, &mut chan, &mut display, 24).unwrap());
        assert_eq!(display.ops, vec![Op::Copy(5, 6, 10, 20, 3, 4)]);
    }

    #[test]
    fn empty_rect_consumes_source_only() {
        let mut chan = channel();
        let mut display = Recorder::default();
        chan.enqueue(&[0, 1, 0, 2]).unwrap();
        let rect = Rect::default();
        assert!(CopyRectDecoder.decode_rect(&rect, &mut chan, &mut display, 24).unwrap());
        assert!(display.ops.is_empty());
        assert_eq!(chan.available(), 0);
    }
}
