//! Cursor pseudo-encodings, converted to straight RGBA.

/// VMware cursor with AND/XOR masks.
pub(super) const VMWARE_CLASSIC: u8 = 0;
/// VMware cursor with RGBA pixels.
pub(super) const VMWARE_ALPHA: u8 = 1;

/// Bits of a VMware mask word that carry colour.
const PIXEL_MASK: u32 = 0xffff_ff00;

const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 0xff];

/// Rich cursor: `w * h` BGRX pixels followed by a 1-bit mask with rows
/// padded to a byte.
pub(super) fn rich_cursor(pixels: &[u8], mask: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mask_row = width.div_ceil(8);
    let mut rgba = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) * 4;
            let bit = mask[y * mask_row + x / 8] << (x % 8) & 0x80;
            let alpha = if bit != 0 { 0xff } else { 0 };
            rgba.extend_from_slice(&[pixels[i + 2], pixels[i + 1], pixels[i], alpha]);
        }
    }
    rgba
}

/// Classic VMware cursor: `w * h` AND mask words, then as many XOR words.
///
/// A zero AND word draws the XOR colour; an AND word that keeps the whole
/// screen pixel is transparent when XOR is zero. Inverting pixels cannot be
/// expressed in RGBA, so everything else becomes opaque black.
pub(super) fn vmware_classic(data: &[u8], pixels: usize) -> Vec<u8> {
    let (and_mask, xor_mask) = data.split_at(pixels * 4);
    let words = |b: &[u8]| -> Vec<u32> {
        b.chunks_exact(4)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    };
    let (and_mask, xor_mask) = (words(and_mask), words(xor_mask));

    let mut rgba = Vec::with_capacity(pixels * 4);
    for (&and, &xor) in and_mask.iter().zip(&xor_mask) {
        let px = if and == 0 {
            let [b, g, r, _] = xor.to_be_bytes();
            [r, g, b, 0xff]
        } else if and & PIXEL_MASK == PIXEL_MASK && xor == 0 {
            [0; 4]
        } else {
            OPAQUE_BLACK
        };
        rgba.extend_from_slice(&px);
    }
    rgba
}

/// Alpha VMware cursor: one RGBA word per pixel.
pub(super) fn vmware_alpha(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}
