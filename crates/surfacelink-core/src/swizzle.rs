//! Channel swizzle between the capture pool's BGRA layout and the host's RGBA.
//!
//! Swapping the red and blue bytes is its own inverse, so the same routine
//! converts in either direction.

use crate::types::Size;

/// Swap red/blue of every pixel of a `size` image.
///
/// `src` rows start every `src_pitch` bytes (GPU row pitch, `>= width * 4`);
/// `dst` is packed (`width * 4` bytes per row). Returns the number of rows
/// converted, which is less than `size.height` only if one of the slices is
/// too short.
pub fn swap_red_blue(dst: &mut [u8], src: &[u8], size: Size, src_pitch: usize) -> u32 {
    let row_bytes = size.width as usize * 4;
    if row_bytes == 0 || src_pitch < row_bytes {
        return 0;
    }

    let mut rows = 0;
    for (dst_row, src_row) in dst
        .chunks_exact_mut(row_bytes)
        .zip(src.chunks(src_pitch))
        .take(size.height as usize)
    {
        let Some(src_row) = src_row.get(..row_bytes) else { break };
        for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
            d[3] = s[3];
        }
        rows += 1;
    }
    rows
}
