//! Local color difference pattern extraction.
//!
//! A descriptor is the center pixel's RGB triplet plus, for every neighbor
//! of the configured pattern, the 9 signed pairwise channel differences
//! between the neighbor color and the center color. Neighbor positions
//! outside the frame are clamped to the border, never wrapped.

use machine_vision_formats::{pixel_format::RGB8, ImageStride};

use lcdp_bgs_types::NeighborhoodPattern;

/// Longest supported difference code (16 neighbors x 9 differences).
pub const MAX_CODE_LEN: usize = 144;

/// The 3x3 ring, row-major.
const OFFSETS_8: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// 16 points from the 5x5 neighborhood: the 3x3 ring plus 8 points at
/// distance two, row-major.
const OFFSETS_16: [(i32, i32); 16] = [
    (-2, -2),
    (-2, 0),
    (-2, 2),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -2),
    (0, -1),
    (0, 1),
    (0, 2),
    (1, -1),
    (1, 0),
    (1, 1),
    (2, -2),
    (2, 0),
    (2, 2),
];

/// Neighbor offsets (row, col) of a pattern.
pub fn offsets(pattern: NeighborhoodPattern) -> &'static [(i32, i32)] {
    match pattern {
        NeighborhoodPattern::Points8 => &OFFSETS_8,
        NeighborhoodPattern::Points16 => &OFFSETS_16,
    }
}

#[inline]
fn rgb_at(data: &[u8], stride: usize, row: u32, col: u32) -> [u8; 3] {
    let start = row as usize * stride + col as usize * 3;
    [data[start], data[start + 1], data[start + 2]]
}

#[inline]
fn clamp_coord(v: i64, max: u32) -> u32 {
    v.clamp(0, max as i64 - 1) as u32
}

/// Compute the descriptor of the pixel at (`row`, `col`).
///
/// Writes the difference code into `code` (which must have the pattern's
/// code length) and returns the center color. Pure: identical frame
/// content and position give identical output.
///
/// The 9 differences per neighbor are ordered by neighbor channel then
/// center channel, so positions 0, 4 and 8 hold the same-channel
/// differences.
pub fn extract<S>(
    frame: &S,
    row: u32,
    col: u32,
    pattern: NeighborhoodPattern,
    code: &mut [i16],
) -> [u8; 3]
where
    S: ImageStride<RGB8>,
{
    let offs = offsets(pattern);
    debug_assert_eq!(code.len(), offs.len() * 9);
    let data = frame.image_data();
    let stride = frame.stride();
    let (width, height) = (frame.width(), frame.height());
    let center = rgb_at(data, stride, row, col);
    for (n, &(dr, dc)) in offs.iter().enumerate() {
        let nr = clamp_coord(row as i64 + dr as i64, height);
        let nc = clamp_coord(col as i64 + dc as i64, width);
        let neighbor = rgb_at(data, stride, nr, nc);
        let out = &mut code[n * 9..(n + 1) * 9];
        let mut k = 0;
        for &nch in neighbor.iter() {
            for &cch in center.iter() {
                out[k] = nch as i16 - cch as i16;
                k += 1;
            }
        }
    }
    center
}

#[cfg(test)]
mod tests {
    use super::*;
    use plain_frame::PlainFrame;

    fn gradient_frame() -> PlainFrame<RGB8> {
        let mut im = PlainFrame::<RGB8>::zeros(5, 4);
        for r in 0..4 {
            for c in 0..5 {
                let px = [(10 * r + c) as u8, (20 * r) as u8, (c * 7) as u8];
                im.pixel_slice_mut(r as u32, c as u32).copy_from_slice(&px);
            }
        }
        im
    }

    #[test]
    fn code_lengths() {
        assert_eq!(offsets(NeighborhoodPattern::Points8).len() * 9, 72);
        assert_eq!(offsets(NeighborhoodPattern::Points16).len() * 9, MAX_CODE_LEN);
    }

    #[test]
    fn extraction_is_pure() {
        let im = gradient_frame();
        let mut a = [0i16; 72];
        let mut b = [0i16; 72];
        let ca = extract(&im, 2, 2, NeighborhoodPattern::Points8, &mut a);
        let cb = extract(&im, 2, 2, NeighborhoodPattern::Points8, &mut b);
        assert_eq!(ca, cb);
        assert_eq!(a, b);
    }

    #[test]
    fn difference_order_per_neighbor() {
        let mut im = PlainFrame::<RGB8>::zeros(3, 3);
        im.pixel_slice_mut(1, 1).copy_from_slice(&[10, 20, 30]);
        im.pixel_slice_mut(0, 0).copy_from_slice(&[50, 60, 70]);
        let mut code = [0i16; 72];
        let center = extract(&im, 1, 1, NeighborhoodPattern::Points8, &mut code);
        assert_eq!(center, [10, 20, 30]);
        // first neighbor is (-1,-1): (Rn-Rc, Rn-Gc, Rn-Bc, Gn-Rc, ...)
        assert_eq!(
            &code[0..9],
            &[40, 30, 20, 50, 40, 30, 60, 50, 40]
        );
        // same-channel differences sit at positions 0, 4 and 8
        assert_eq!(code[0], 50 - 10);
        assert_eq!(code[4], 60 - 20);
        assert_eq!(code[8], 70 - 30);
    }

    #[test]
    fn border_neighbors_clamp_to_frame() {
        let im = gradient_frame();
        let mut code = [0i16; 72];
        let center = extract(&im, 0, 0, NeighborhoodPattern::Points8, &mut code);
        // offsets reaching above or left of the corner clamp onto the
        // center pixel itself, so their same-channel differences are zero
        assert_eq!(center, [0, 0, 0]);
        for n in [0usize, 1, 3] {
            assert_eq!(code[n * 9], 0);
            assert_eq!(code[n * 9 + 4], 0);
            assert_eq!(code[n * 9 + 8], 0);
        }
        // the in-frame neighbor (0,1) really differs
        let right = &code[4 * 9..5 * 9];
        assert_eq!(right[0], 1);
    }

    #[test]
    fn wide_pattern_reads_distance_two() {
        let im = gradient_frame();
        let mut code = [0i16; MAX_CODE_LEN];
        extract(&im, 2, 2, NeighborhoodPattern::Points16, &mut code);
        // first offset is (-2,-2): neighbor at (0,0), center at (2,2)
        let center = [22u8, 40, 14];
        let neighbor = [0u8, 0, 0];
        assert_eq!(code[0], neighbor[0] as i16 - center[0] as i16);
        assert_eq!(code[4], neighbor[1] as i16 - center[1] as i16);
        assert_eq!(code[8], neighbor[2] as i16 - center[2] as i16);
    }
}
