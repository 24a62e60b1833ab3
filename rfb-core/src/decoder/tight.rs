//! Tight and TightPNG encodings.
//!
//! Every rect starts with a control byte. Its low nibble lists zlib streams
//! to reset; its high nibble picks the compression:
//!
//! | High nibble | Meaning                                       |
//! |-------------|-----------------------------------------------|
//! | `0x0-0x7`   | basic: optional filter byte, zlib stream 0-3  |
//! | `0x8`       | fill with one RGB colour                      |
//! | `0x9`       | JPEG blob                                     |
//! | `0xA`       | PNG blob (TightPNG only)                      |
//!
//! Basic data shorter than [`MIN_TO_COMPRESS`] bytes is sent as is;
//! anything longer is prefixed with a 1-3 byte compact length and
//! compressed on one of four persistent zlib streams.

use flate2::{Decompress, FlushDecompress, Status};
use tracing::debug;

use crate::channel::ByteChannel;
use crate::decoder::{Rect, RectDecoder, rgb_color, rgb_to_bgrx};
use crate::display::{BYTES_PER_PIXEL, Color, Display, ImageKind};
use crate::error::RfbError;

/// Basic data shorter than this is never compressed.
pub const MIN_TO_COMPRESS: usize = 12;

const FILL: u8 = 0x08;
const JPEG: u8 = 0x09;
const PNG: u8 = 0x0A;

const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

/// Bytes per pixel of Tight pixel data at depth 24.
const TPIXEL_LEN: usize = 3;

pub struct TightDecoder {
    /// Only PNG and no basic compression.
    png: bool,
    /// High nibble of the control byte of the rect in progress.
    ctl: Option<u8>,
    filter: Option<u8>,
    palette: Vec<Color>,
    /// Compact length already read for the blob in progress.
    len: Option<usize>,
    zlibs: [Decompress; 4],
}

impl Default for TightDecoder {
    fn default() -> Self {
        Self {
            png: false,
            ctl: None,
            filter: None,
            palette: Vec::new(),
            len: None,
            zlibs: std::array::from_fn(|_| Decompress::new(true)),
        }
    }
}

impl std::fmt::Debug for TightDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TightDecoder")
            .field("png", &self.png)
            .field("ctl", &self.ctl)
            .field("filter", &self.filter)
            .field("palette", &self.palette.len())
            .field("len", &self.len)
            .finish()
    }
}

impl RectDecoder for TightDecoder {
    fn decode_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        _depth: u8,
    ) -> Result<bool, RfbError> {
        let ctl = match self.ctl {
            Some(ctl) => ctl,
            None => {
                if chan.wait_for(1, 0)? {
                    return Ok(false);
                }
                let byte = chan.shift_u8()?;
                for (i, zlib) in self.zlibs.iter_mut().enumerate() {
                    if (byte >> i) & 1 == 1 {
                        zlib.reset(true);
                        debug!(stream = i, "reset tight zlib stream");
                    }
                }
                self.ctl = Some(byte >> 4);
                byte >> 4
            }
        };

        let done = match ctl {
            FILL => self.fill_rect(rect, chan, display)?,
            JPEG => self.image_rect(rect, chan, display, ImageKind::Jpeg)?,
            PNG if self.png => self.image_rect(rect, chan, display, ImageKind::Png)?,
            PNG => {
                return Err(RfbError::Decode(
                    "PNG received in standard Tight rect".into(),
                ));
            }
            ctl if ctl & FILL == 0 => {
                if self.png {
                    return Err(RfbError::Decode(
                        "basic compression received in TightPNG rect".into(),
                    ));
                }
                self.basic_rect(ctl, rect, chan, display)?
            }
            ctl => {
                return Err(RfbError::Decode(format!(
                    "illegal tight compression received (ctl: {ctl:#x})"
                )));
            }
        };

        if done {
            self.ctl = None;
        }
        Ok(done)
    }
}

impl TightDecoder {
    /// Decoder for the TightPNG variant.
    pub fn png() -> Self {
        Self {
            png: true,
            ..Self::default()
        }
    }

    fn fill_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        if chan.wait_for(TPIXEL_LEN, 0)? {
            return Ok(false);
        }
        let color = rgb_color(chan.shift_array()?);
        display.fill_rect(rect.x, rect.y, rect.width, rect.height, color);
        Ok(true)
    }

    fn image_rect(
        &mut self,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
        kind: ImageKind,
    ) -> Result<bool, RfbError> {
        let Some(data) = self.read_data(chan)? else {
            return Ok(false);
        };
        display.image_rect(rect.x, rect.y, rect.width, rect.height, kind, &data);
        Ok(true)
    }

    fn basic_rect(
        &mut self,
        ctl: u8,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        let filter = match self.filter {
            Some(filter) => filter,
            None => {
                let filter = if ctl & 0x04 != 0 {
                    if chan.wait_for(1, 0)? {
                        return Ok(false);
                    }
                    chan.shift_u8()?
                } else {
                    FILTER_COPY
                };
                self.filter = Some(filter);
                filter
            }
        };

        let stream = (ctl & 0x03) as usize;
        let done = match filter {
            FILTER_COPY => self.copy_filter(stream, rect, chan, display)?,
            FILTER_PALETTE => self.palette_filter(stream, rect, chan, display)?,
            FILTER_GRADIENT => self.gradient_filter(stream, rect, chan, display)?,
            filter => {
                return Err(RfbError::Decode(format!(
                    "illegal tight filter received (filter: {filter})"
                )));
            }
        };

        if done {
            self.filter = None;
        }
        Ok(done)
    }

    fn copy_filter(
        &mut self,
        stream: usize,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        let size = rect.area() * TPIXEL_LEN;
        let Some(data) = self.read_filtered(stream, size, chan)? else {
            return Ok(false);
        };
        display.blit_image(rect.x, rect.y, rect.width, rect.height, &rgb_to_bgrx(&data));
        Ok(true)
    }

    fn palette_filter(
        &mut self,
        stream: usize,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        if self.palette.is_empty() {
            if chan.wait_for(1, 0)? {
                return Ok(false);
            }
            let colors = chan.peek_u8()? as usize + 1;
            if chan.wait_for(1 + colors * TPIXEL_LEN, 0)? {
                return Ok(false);
            }
            chan.skip(1)?;
            let raw = chan.shift_bytes(colors * TPIXEL_LEN)?;
            self.palette = raw
                .chunks_exact(TPIXEL_LEN)
                .map(|c| rgb_color([c[0], c[1], c[2]]))
                .collect();
        }

        let bpp = if self.palette.len() <= 2 { 1 } else { 8 };
        let row_len = (rect.width as usize * bpp).div_ceil(8);
        let Some(data) = self.read_filtered(stream, row_len * rect.height as usize, chan)? else {
            return Ok(false);
        };

        let pixels = if bpp == 1 {
            mono_pixels(rect, &data, row_len, &self.palette)?
        } else {
            palette_pixels(&data, &self.palette)?
        };
        display.blit_image(rect.x, rect.y, rect.width, rect.height, &pixels);
        self.palette.clear();
        Ok(true)
    }

    fn gradient_filter(
        &mut self,
        stream: usize,
        rect: &Rect,
        chan: &mut ByteChannel,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        let size = rect.area() * TPIXEL_LEN;
        let Some(data) = self.read_filtered(stream, size, chan)? else {
            return Ok(false);
        };
        let rgb = undo_gradient(&data, rect.width as usize);
        display.blit_image(rect.x, rect.y, rect.width, rect.height, &rgb_to_bgrx(&rgb));
        Ok(true)
    }

    /// `size` bytes of filtered data, read raw or inflated depending on
    /// its length.
    fn read_filtered(
        &mut self,
        stream: usize,
        size: usize,
        chan: &mut ByteChannel,
    ) -> Result<Option<Vec<u8>>, RfbError> {
        if size < MIN_TO_COMPRESS {
            if chan.wait_for(size, 0)? {
                return Ok(None);
            }
            return Ok(Some(chan.shift_bytes(size)?.to_vec()));
        }
        let Some(compressed) = self.read_data(chan)? else {
            return Ok(None);
        };
        self.inflate(stream, &compressed, size).map(Some)
    }

    /// A blob prefixed with a compact length.
    fn read_data(&mut self, chan: &mut ByteChannel) -> Result<Option<Vec<u8>>, RfbError> {
        let len = match self.len {
            Some(len) => len,
            None => {
                let Some(len) = read_compact_len(chan)? else {
                    return Ok(None);
                };
                self.len = Some(len);
                len
            }
        };
        if chan.wait_for(len, 0)? {
            return Ok(None);
        }
        self.len = None;
        Ok(Some(chan.shift_bytes(len)?.to_vec()))
    }

    fn inflate(&mut self, stream: usize, input: &[u8], expected: usize) -> Result<Vec<u8>, RfbError> {
        let zlib = &mut self.zlibs[stream];
        let mut out = Vec::with_capacity(expected);
        let mut consumed = 0;
        while out.len() < expected {
            let before_in = zlib.total_in();
            let before_out = zlib.total_out();
            let status = zlib.decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)?;
            consumed += (zlib.total_in() - before_in) as usize;
            let stalled = zlib.total_in() == before_in && zlib.total_out() == before_out;
            if status == Status::StreamEnd || stalled {
                break;
            }
        }
        if out.len() != expected {
            return Err(RfbError::Decode(format!(
                "incomplete tight zlib block (expected {expected} bytes, got {})",
                out.len()
            )));
        }
        Ok(out)
    }
}

/// 1-3 byte length, 7 bits per byte, high bit set when another byte
/// follows. Nothing is consumed until the whole length is buffered.
fn read_compact_len(chan: &mut ByteChannel) -> Result<Option<usize>, RfbError> {
    let mut len = 0usize;
    for i in 0..3 {
        if chan.wait_for(i + 1, 0)? {
            return Ok(None);
        }
        let byte = chan.peek_at(i)?;
        if i == 2 {
            len |= (byte as usize) << 14;
        } else {
            len |= ((byte & 0x7f) as usize) << (7 * i);
            if byte & 0x80 == 0 {
                chan.skip(i + 1)?;
                return Ok(Some(len));
            }
        }
    }
    chan.skip(3)?;
    Ok(Some(len))
}

fn palette_color(palette: &[Color], index: u8) -> Result<Color, RfbError> {
    palette.get(index as usize).copied().ok_or_else(|| {
        RfbError::Decode(format!(
            "tight palette index {index} out of range ({} colours)",
            palette.len()
        ))
    })
}

/// Two-colour palette data: one bit per pixel, rows padded to a byte.
fn mono_pixels(rect: &Rect, data: &[u8], row_len: usize, palette: &[Color]) -> Result<Vec<u8>, RfbError> {
    let mut out = Vec::with_capacity(rect.area() * BYTES_PER_PIXEL);
    if row_len == 0 {
        return Ok(out);
    }
    for row in data.chunks_exact(row_len).take(rect.height as usize) {
        for x in 0..rect.width as usize {
            let bit = (row[x / 8] >> (7 - x % 8)) & 1;
            out.extend_from_slice(&palette_color(palette, bit)?);
        }
    }
    Ok(out)
}

fn palette_pixels(data: &[u8], palette: &[Color]) -> Result<Vec<u8>, RfbError> {
    let mut out = Vec::with_capacity(data.len() * BYTES_PER_PIXEL);
    for &index in data {
        out.extend_from_slice(&palette_color(palette, index)?);
    }
    Ok(out)
}

/// Each channel was sent as the difference from `left + up - up_left`,
/// clamped to 0..=255.
fn undo_gradient(data: &[u8], width: usize) -> Vec<u8> {
    let stride = width * TPIXEL_LEN;
    let mut out = vec![0u8; data.len()];
    for i in 0..data.len() {
        let x = (i % stride) / TPIXEL_LEN;
        let row = i / stride;
        let left = if x > 0 { out[i - TPIXEL_LEN] as i32 } else { 0 };
        let up = if row > 0 { out[i - stride] as i32 } else { 0 };
        let up_left = if x > 0 && row > 0 {
            out[i - stride - TPIXEL_LEN] as i32
        } else {
            0
        };
        let predicted = (left + up - up_left).clamp(0, 255) as u8;
        out[i] = data[i].wrapping_add(predicted);
    }
    out
}
