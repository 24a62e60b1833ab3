//! Hextile encoding.
//!
//! The rect is split into 16×16 tiles, left to right then top to bottom,
//! with the last column and row clipped. Each tile starts with a
//! sub-encoding byte:
//!
//! | Bit  | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0x01 | raw tile pixels follow; all other bits are ignored   |
//! | 0x02 | a new background colour follows                      |
//! | 0x04 | a new foreground colour follows                      |
//! | 0x08 | a sub-rect count and that many sub-rects follow      |
//! | 0x10 | every sub-rect carries its own colour                |
//!
//! A tile is only consumed once it is completely buffered, so a tile is
//! never half drawn.

use tracing::debug;

use crate::channel::ByteChannel;
use crate::decoder::{Rect, RectDecoder};
use crate::display::{BYTES_PER_PIXEL, Color, Display};
use crate::error::RfbError;

const TILE_SIZE: u16 = 16;

const RAW: u8 = 0x01;
const BACKGROUND: u8 = 0x02;
const FOREGROUND: u8 = 0x04;
const ANY_SUBRECTS: u8 = 0x08;
const SUBRECTS_COLOURED: u8 = 0x10;

/// Highest valid sub-encoding byte.
const MAX_SUBENCODING: u8 = 30;

#[derive(Debug, Default)]
pub struct HextileDecoder {
    /// Tiles still to decode in the current rect.
    tiles: u32,
    total_tiles: u32,
    tiles_x: u32,
    last_subencoding: u8,
    /// Colours carry over from tile to tile and rect to rect.
    background: Color,
    foreground: Color,
}

impl RectDecoder for HextileDecoder {
    fn decode_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        _depth: u8,
    ) -> Result<bool, RfbError> {
        if self.tiles == 0 {
            self.tiles_x = rect.width.div_ceil(TILE_SIZE) as u32;
            let tiles_y = rect.height.div_ceil(TILE_SIZE) as u32;
            self.total_tiles = self.tiles_x * tiles_y;
            self.tiles = self.total_tiles;
        }

        while self.tiles > 0 {
            if chan.wait_for(1, 0)? {
                return Ok(false);
            }
            let subencoding = chan.peek_u8()?;
            if subencoding > MAX_SUBENCODING {
                return Err(RfbError::Decode(format!(
                    "illegal hextile subencoding (subencoding: {subencoding})"
                )));
            }

            let current = self.total_tiles - self.tiles;
            let tile = TILE_SIZE as u32;
            let off_x = (current % self.tiles_x) * tile;
            let off_y = (current / self.tiles_x) * tile;
            let tw = tile.min(rect.width as u32 - off_x) as u16;
            let th = tile.min(rect.height as u32 - off_y) as u16;
            let tx = rect.x.saturating_add(off_x as u16);
            let ty = rect.y.saturating_add(off_y as u16);

            let Some(len) = tile_len(chan, subencoding, tw, th)? else {
                return Ok(false);
            };
            if chan.wait_for(len, 0)? {
                return Ok(false);
            }

            chan.skip(1)?;
            if subencoding == 0 {
                if self.last_subencoding & RAW != 0 {
                    debug!("ignoring blank hextile tile after raw");
                } else {
                    display.fill_rect(tx, ty, tw, th, self.background);
                }
            } else if subencoding & RAW != 0 {
                let pixels = chan.shift_bytes(len - 1)?;
                display.blit_image(tx, ty, tw, th, pixels);
            } else {
                self.decode_tile(chan, display, subencoding, (tx, ty, tw, th))?;
            }

            self.last_subencoding = subencoding;
            self.tiles -= 1;
        }
        Ok(true)
    }
}

impl HextileDecoder {
    /// Decode a fully buffered non-raw tile; the sub-encoding byte has
    /// already been consumed.
    fn decode_tile(
        &mut self,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        subencoding: u8,
        (tx, ty, tw, th): (u16, u16, u16, u16),
    ) -> Result<(), RfbError> {
        if subencoding & BACKGROUND != 0 {
            self.background = chan.shift_array()?;
        }
        if subencoding & FOREGROUND != 0 {
            self.foreground = chan.shift_array()?;
        }

        display.start_tile(tx, ty, tw, th, self.background);
        if subencoding & ANY_SUBRECTS != 0 {
            let subrects = chan.shift_u8()?;
            for _ in 0..subrects {
                let color = if subencoding & SUBRECTS_COLOURED != 0 {
                    chan.shift_array()?
                } else {
                    self.foreground
                };
                let xy = chan.shift_u8()?;
                let wh = chan.shift_u8()?;
                display.sub_tile(xy >> 4, xy & 0x0f, (wh >> 4) + 1, (wh & 0x0f) + 1, color);
            }
        }
        display.finish_tile();
        Ok(())
    }
}

/// Bytes the whole tile occupies, sub-encoding byte included. `None` when
/// even the sub-rect count is not buffered yet.
fn tile_len(
    chan: &mut ByteChannel,
    subencoding: u8,
    tw: u16,
    th: u16,
) -> Result<Option<usize>, RfbError> {
    let mut len = 1;
    if subencoding & RAW != 0 {
        return Ok(Some(len + tw as usize * th as usize * BYTES_PER_PIXEL));
    }
    if subencoding & BACKGROUND != 0 {
        len += 4;
    }
    if subencoding & FOREGROUND != 0 {
        len += 4;
    }
    if subencoding & ANY_SUBRECTS != 0 {
        len += 1;
        if chan.wait_for(len, 0)? {
            return Ok(None);
        }
        let subrects = chan.peek_at(len - 1)? as usize;
        len += if subencoding & SUBRECTS_COLOURED != 0 {
            subrects * (4 + 2)
        } else {
            subrects * 2
        };
    }
    Ok(Some(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::{Op, Recorder, channel};

    const RED: Color = [0, 0, 255, 0];
    const GREEN: Color = [0, 255, 0, 0];

    fn rect(w: u16, h: u16) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: w,
            height: h,
            encoding: 5,
        }
    }

    #[test]
    fn background_and_coloured_subrects() {
        let mut chan = channel();
        let mut display = Recorder::default();
        let mut dec = HextileDecoder::default();

        let mut wire = vec![BACKGROUND | ANY_SUBRECTS | SUBRECTS_COLOURED];
        wire.extend_from_slice(&RED);
        wire.push(1);
        wire.extend_from_slice(&GREEN);
        wire.extend_from_slice(&[0x12, 0x31]);
        chan.enqueue(&wire).unwrap();

        assert!(dec.decode_rect(&rect(4, 4), &mut chan, &mut display, 24).unwrap());
        assert_eq!(
            display.ops,
            vec![
                Op::StartTile(0, 0, 4, 4, RED),
                Op::SubTile(1, 2, 4, 2, GREEN),
                Op::FinishTile,
            ]
        );
    }

    #[test]
    fn tiles_are_clipped_and_ordered() {
        let mut chan = channel();
        let mut display = Recorder::default();
        let mut dec = HextileDecoder::default();

        // 20x17 -> 2x2 tiles: (0,0,16,16) (16,0,4,16) (0,16,16,1) (16,16,4,1)
        chan.enqueue(&[BACKGROUND, 1, 2, 3, 0, 0, 0, 0]).unwrap();
        assert!(dec.decode_rect(&rect(20, 17), &mut chan, &mut display, 24).unwrap());
        let bg = [1, 2, 3, 0];
        assert_eq!(
            display.ops,
            vec![
                Op::StartTile(0, 0, 16, 16, bg),
                Op::FinishTile,
                Op::Fill(16, 0, 4, 16, bg),
                Op::Fill(0, 16, 16, 1, bg),
                Op::Fill(16, 16, 4, 1, bg),
            ]
        );
    }

    #[test]
    fn blank_after_raw_is_ignored() {
        let mut chan = channel();
        let mut display = Recorder::default();
        let mut dec = HextileDecoder::default();

        let mut wire = vec![RAW];
        wire.extend_from_slice(&[9; 16 * 4 * 4]);
        wire.push(0);
        chan.enqueue(&wire).unwrap();

        assert!(dec.decode_rect(&rect(20, 4), &mut chan, &mut display, 24).unwrap());
        assert_eq!(display.ops, vec![Op::Blit(0, 0, 16, 4, vec![9; 16 * 4 * 4])]);
        assert_eq!(chan.available(), 0);
    }

    #[test]
    fn partial_tile_is_not_consumed() {
        let mut chan = channel();
        let mut display = Recorder::default();
        let mut dec = HextileDecoder::default();

        let wire = [
            FOREGROUND | ANY_SUBRECTS,
            7, 7, 7, 0,
            2,
            0x00, 0x00,
            0x11, 0x00,
        ];
        for (i, b) in wire.iter().enumerate() {
            chan.enqueue(&[*b]).unwrap();
            let done = dec.decode_rect(&rect(8, 8), &mut chan, &mut display, 24).unwrap();
            assert_eq!(done, i == wire.len() - 1);
            assert_eq!(display.ops.is_empty(), !done);
        }
        assert_eq!(
            display.ops,
            vec![
                Op::StartTile(0, 0, 8, 8, [0; 4]),
                Op::SubTile(0, 0, 1, 1, [7, 7, 7, 0]),
                Op::SubTile(1, 1, 1, 1, [7, 7, 7, 0]),
                Op::FinishTile,
            ]
        );
    }

    #[test]
    fn colours_carry_over_to_later_tiles() {
        let mut chan = channel();
        let mut display = Recorder::default();
        let mut dec = HextileDecoder::default();

        let mut wire = vec![BACKGROUND | FOREGROUND | ANY_SUBRECTS];
        wire.extend_from_slice(&GREEN);
        wire.extend_from_slice(&RED);
        wire.extend_from_slice(&[1, 0x00, 0x00]);
        // second tile: subrects only
        wire.extend_from_slice(&[ANY_SUBRECTS, 1, 0x11, 0x00]);
        chan.enqueue(&wire).unwrap();

        assert!(dec.decode_rect(&rect(32, 16), &mut chan, &mut display, 24).unwrap());
        assert_eq!(
            display.ops,
            vec![
                Op::StartTile(0, 0, 16, 16, GREEN),
                Op::SubTile(0, 0, 1, 1, RED),
                Op::FinishTile,
                Op::StartTile(16, 0, 16, 16, GREEN),
                Op::SubTile(1, 1, 1, 1, RED),
                Op::FinishTile,
            ]
        );
    }

    #[test]
    fn rejects_bad_subencoding() {
        let mut chan = channel();
        let mut display = Recorder::default();
        chan.enqueue(&[31]).unwrap();
        let err = HextileDecoder::default()
            .decode_rect(&rect(16, 16), &mut chan, &mut display, 24)
            .unwrap_err();
        assert!(matches!(err, RfbError::Decode(_)));
    }
}
