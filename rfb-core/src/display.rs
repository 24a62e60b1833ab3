//! Drawing sink for decoded rects, and an in-memory implementation.
//!
//! Every colour and pixel buffer handed to a [`Display`] is 4 bytes per
//! pixel in wire order: blue, green, red, unused.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::Notify;

/// One BGRX pixel.
pub type Color = [u8; 4];

/// Bytes per pixel of every buffer passed to a [`Display`].
pub const BYTES_PER_PIXEL: usize = 4;

/// Compressed image blobs carried by Tight rects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Jpeg,
    Png,
}

/// Completion signal for displays that render asynchronously.
///
/// The display keeps one clone and calls [`notify`](Self::notify) once the
/// frame it was flushing is on screen; [`drive`](crate::drive) waits on
/// another clone and resumes the session. A notification sent while nobody
/// waits is kept for the next wait.
#[derive(Debug, Clone, Default)]
pub struct FlushSignal(Arc<Notify>);

impl FlushSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub async fn flushed(&self) {
        self.0.notified().await;
    }
}

/// Receives primitive drawing operations from the session.
///
/// `flush` may complete asynchronously: while [`pending`](Display::pending)
/// reports a frame still rendering, the session stops processing updates
/// until [`Session::flush_complete`](crate::Session::flush_complete) is
/// called. Such displays hand out a [`FlushSignal`] so that
/// [`drive`](crate::drive) learns when rendering finished.
pub trait Display {
    fn resize(&mut self, width: u16, height: u16);

    fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, color: Color);

    /// `data` holds `width * height` BGRX pixels.
    fn blit_image(&mut self, x: u16, y: u16, width: u16, height: u16, data: &[u8]);

    fn copy_image(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16);

    /// Begin a tile filled with `background`.
    fn start_tile(&mut self, x: u16, y: u16, width: u16, height: u16, background: Color);

    /// Paint into the current tile; coordinates are tile-relative.
    fn sub_tile(&mut self, x: u8, y: u8, width: u8, height: u8, color: Color);

    fn finish_tile(&mut self);

    /// A JPEG or PNG blob to be decoded and drawn at the given rect.
    fn image_rect(&mut self, x: u16, y: u16, width: u16, height: u16, kind: ImageKind, data: &[u8]);

    /// Present everything drawn since the last flip.
    fn flip(&mut self);

    fn pending(&self) -> bool;

    fn flush(&mut self);

    /// Raised when an asynchronous flush completes. `None` for displays
    /// that finish every frame before returning.
    fn flush_signal(&self) -> Option<FlushSignal> {
        None
    }
}

// ── Framebuffer ──────────────────────────────────────────────────

struct Tile {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

/// Synchronous in-memory [`Display`] holding a BGRX pixel buffer.
///
/// Image blobs are counted but not decoded.
#[derive(Default)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
    tile: Option<Tile>,
    frames: u64,
    images: u64,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Number of completed `flip` calls.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Number of image blobs received.
    pub fn images(&self) -> u64 {
        self.images
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at `(x, y)`, or `None` outside the buffer.
    pub fn pixel(&self, x: u16, y: u16) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        let mut c = [0u8; 4];
        c.copy_from_slice(&self.pixels[i..i + BYTES_PER_PIXEL]);
        Some(c)
    }

    /// Write the buffer as a binary PPM (P6).
    pub fn write_ppm<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let mut rgb = Vec::with_capacity(self.pixels.len() / BYTES_PER_PIXEL * 3);
        for px in self.pixels.chunks_exact(BYTES_PER_PIXEL) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        out.write_all(&rgb)
    }

    fn offset(&self, x: u16, y: u16) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    /// Clip a rect to the buffer, returning `(x, y, w, h)` in pixels.
    fn clip(&self, x: u16, y: u16, w: u16, h: u16) -> Option<(usize, usize, usize, usize)> {
        let (x, y) = (x as usize, y as usize);
        let (fw, fh) = (self.width as usize, self.height as usize);
        if x >= fw || y >= fh {
            return None;
        }
        let w = (w as usize).min(fw - x);
        let h = (h as usize).min(fh - y);
        (w > 0 && h > 0).then_some((x, y, w, h))
    }
}

impl Display for Framebuffer {
    fn resize(&mut self, width: u16, height: u16) {
        let mut pixels = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        let keep_w = width.min(self.width) as usize * BYTES_PER_PIXEL;
        for row in 0..height.min(self.height) as usize {
            let src = row * self.width as usize * BYTES_PER_PIXEL;
            let dst = row * width as usize * BYTES_PER_PIXEL;
            pixels[dst..dst + keep_w].copy_from_slice(&self.pixels[src..src + keep_w]);
        }
        self.width = width;
        self.height = height;
        self.pixels = pixels;
    }

    fn fill_rect(&mut self, x: u16, y: u16, width: u16, height: u16, color: Color) {
        let Some((x, y, w, h)) = self.clip(x, y, width, height) else {
            return;
        };
        let stride = self.width as usize * BYTES_PER_PIXEL;
        for row in y..y + h {
            let start = row * stride + x * BYTES_PER_PIXEL;
            for px in self.pixels[start..start + w * BYTES_PER_PIXEL].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
    }

    fn blit_image(&mut self, x: u16, y: u16, width: u16, height: u16, data: &[u8]) {
        let Some((cx, cy, w, h)) = self.clip(x, y, width, height) else {
            return;
        };
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let src_stride = width as usize * BYTES_PER_PIXEL;
        for row in 0..h {
            let src = row * src_stride;
            let Some(line) = data.get(src..src + w * BYTES_PER_PIXEL) else {
                return;
            };
            let dst = (cy + row) * stride + cx * BYTES_PER_PIXEL;
            self.pixels[dst..dst + line.len()].copy_from_slice(line);
        }
    }

    fn copy_image(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16) {
        let Some((sx, sy, sw, sh)) = self.clip(src_x, src_y, width, height) else {
            return;
        };
        let Some((dx, dy, dw, dh)) = self.clip(x, y, sw as u16, sh as u16) else {
            return;
        };
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let mut region = Vec::with_capacity(dw * dh * BYTES_PER_PIXEL);
        for row in sy..sy + dh {
            let start = row * stride + sx * BYTES_PER_PIXEL;
            region.extend_from_slice(&self.pixels[start..start + dw * BYTES_PER_PIXEL]);
        }
        for (i, row) in (dy..dy + dh).enumerate() {
            let dst = row * stride + dx * BYTES_PER_PIXEL;
            let src = i * dw * BYTES_PER_PIXEL;
            self.pixels[dst..dst + dw * BYTES_PER_PIXEL]
                .copy_from_slice(&region[src..src + dw * BYTES_PER_PIXEL]);
        }
    }

    fn start_tile(&mut self, x: u16, y: u16, width: u16, height: u16, background: Color) {
        let pixels = background.repeat(width as usize * height as usize);
        self.tile = Some(Tile {
            x,
            y,
            width,
            height,
            pixels,
        });
    }

    fn sub_tile(&mut self, x: u8, y: u8, width: u8, height: u8, color: Color) {
        let Some(tile) = self.tile.as_mut() else {
            return;
        };
        let x_end = (x as u16 + width as u16).min(tile.width) as usize;
        let y_end = (y as u16 + height as u16).min(tile.height) as usize;
        for row in y as usize..y_end {
            for col in x as usize..x_end {
                let i = (row * tile.width as usize + col) * BYTES_PER_PIXEL;
                tile.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&color);
            }
        }
    }

    fn finish_tile(&mut self) {
        if let Some(tile) = self.tile.take() {
            self.blit_image(tile.x, tile.y, tile.width, tile.height, &tile.pixels);
        }
    }

    fn image_rect(&mut self, _x: u16, _y: u16, _w: u16, _h: u16, _kind: ImageKind, _data: &[u8]) {
        self.images += 1;
    }

    fn flip(&mut self) {
        self.frames += 1;
    }

    fn pending(&self) -> bool {
        false
    }

    fn flush(&mut self) {}
}
