//! Image operations for binary masks and color frames, implemented in pure
//! Rust over the [`machine_vision_formats`] traits.
//!
//! Masks are `MONO8` images where zero means "clear" and any nonzero byte
//! means "set"; operations write exactly 0 or 255. All functions are
//! stride-aware and never touch bytes beyond the image width.

// The public functions are `#[inline]` because the callers typically run
// them once per frame in a tight loop and the generic indirection otherwise
// shows up in profiles.

use machine_vision_formats::{
    pixel_format::{Mono8, RGB8},
    ImageMutData, ImageStride,
};

fn assert_same_dims_mono8<SRC, DST>(src: &SRC, dst: &DST)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8>,
{
    assert!(
        src.width() == dst.width() && src.height() == dst.height(),
        "source and destination dimensions differ"
    );
}

/// Row `r` of a mono8 image as a width-limited slice.
fn mono8_row(data: &[u8], stride: usize, width: usize, r: usize) -> &[u8] {
    &data[r * stride..][..width]
}

fn clamp_index(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

/// Slice-level morphology shared by the public entry points. `grow` selects
/// dilation (any set pixel in the window sets the output) versus erosion
/// (any clear pixel clears it). The window is clipped at the image border.
fn morph_raw(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: usize,
    ksize: usize,
    grow: bool,
) {
    assert!(ksize % 2 == 1, "kernel size must be odd");
    let half = ksize / 2;
    for row in 0..height {
        let r0 = row.saturating_sub(half);
        let r1 = (row + half).min(height - 1);
        for col in 0..width {
            let c0 = col.saturating_sub(half);
            let c1 = (col + half).min(width - 1);
            let mut hit = false;
            'window: for rr in r0..=r1 {
                for &px in &mono8_row(src, src_stride, width, rr)[c0..=c1] {
                    if (px != 0) == grow {
                        hit = true;
                        break 'window;
                    }
                }
            }
            dst[row * dst_stride + col] = if hit == grow { 255 } else { 0 };
        }
    }
}

/// Morphological dilation of a binary mask with a `ksize` x `ksize` square
/// structuring element.
///
/// Panics: panics if the image data is smaller than stride*height, if stride
/// is smaller than width, if the dimensions of `src` and `dst` differ, or if
/// `ksize` is even.
#[inline]
pub fn dilate<SRC, DST>(src: &SRC, dst: &mut DST, ksize: usize)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    assert_same_dims_mono8(src, dst);
    let width = src.width() as usize;
    let height = src.height() as usize;
    let src_stride = src.stride();
    let dst_stride = dst.stride();
    let src_data = src.image_data();
    let dst_full = dst.buffer_mut_ref();
    morph_raw(
        src_data,
        src_stride,
        &mut dst_full.data[..],
        dst_stride,
        width,
        height,
        ksize,
        true,
    );
}

/// Morphological erosion of a binary mask with a `ksize` x `ksize` square
/// structuring element.
///
/// Panics: as for [`dilate`].
#[inline]
pub fn erode<SRC, DST>(src: &SRC, dst: &mut DST, ksize: usize)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    assert_same_dims_mono8(src, dst);
    let width = src.width() as usize;
    let height = src.height() as usize;
    let src_stride = src.stride();
    let dst_stride = dst.stride();
    let src_data = src.image_data();
    let dst_full = dst.buffer_mut_ref();
    morph_raw(
        src_data,
        src_stride,
        &mut dst_full.data[..],
        dst_stride,
        width,
        height,
        ksize,
        false,
    );
}

/// Morphological opening (erosion then dilation). Removes specks smaller
/// than the structuring element.
///
/// Panics: as for [`dilate`].
#[inline]
pub fn open<SRC, DST>(src: &SRC, dst: &mut DST, ksize: usize)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    assert_same_dims_mono8(src, dst);
    let width = src.width() as usize;
    let height = src.height() as usize;
    let mut scratch = vec![0u8; width * height];
    morph_raw(
        src.image_data(),
        src.stride(),
        &mut scratch,
        width,
        width,
        height,
        ksize,
        false,
    );
    let dst_stride = dst.stride();
    let dst_full = dst.buffer_mut_ref();
    morph_raw(
        &scratch,
        width,
        &mut dst_full.data[..],
        dst_stride,
        width,
        height,
        ksize,
        true,
    );
}

/// Morphological closing (dilation then erosion). Fills gaps smaller than
/// the structuring element.
///
/// Panics: as for [`dilate`].
#[inline]
pub fn close<SRC, DST>(src: &SRC, dst: &mut DST, ksize: usize)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    assert_same_dims_mono8(src, dst);
    let width = src.width() as usize;
    let height = src.height() as usize;
    let mut scratch = vec![0u8; width * height];
    morph_raw(
        src.image_data(),
        src.stride(),
        &mut scratch,
        width,
        width,
        height,
        ksize,
        true,
    );
    let dst_stride = dst.stride();
    let dst_full = dst.buffer_mut_ref();
    morph_raw(
        &scratch,
        width,
        &mut dst_full.data[..],
        dst_stride,
        width,
        height,
        ksize,
        false,
    );
}

/// Binary median filter: each output pixel is set when a strict majority of
/// the `ksize` x `ksize` window around it is set. The window is clipped at
/// the image border.
///
/// Panics: as for [`dilate`].
#[inline]
pub fn median_binary<SRC, DST>(src: &SRC, dst: &mut DST, ksize: usize)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    assert_same_dims_mono8(src, dst);
    assert!(ksize % 2 == 1, "kernel size must be odd");
    let width = src.width() as usize;
    let height = src.height() as usize;
    let src_stride = src.stride();
    let src_data = src.image_data();
    let half = ksize / 2;
    let dst_stride = dst.stride();
    let dst_full = dst.buffer_mut_ref();
    for row in 0..height {
        let r0 = row.saturating_sub(half);
        let r1 = (row + half).min(height - 1);
        for col in 0..width {
            let c0 = col.saturating_sub(half);
            let c1 = (col + half).min(width - 1);
            let mut set = 0usize;
            for rr in r0..=r1 {
                for &px in &mono8_row(src_data, src_stride, width, rr)[c0..=c1] {
                    if px != 0 {
                        set += 1;
                    }
                }
            }
            let window = (r1 - r0 + 1) * (c1 - c0 + 1);
            dst_full.data[row * dst_stride + col] = if 2 * set > window { 255 } else { 0 };
        }
    }
}

/// Fill the holes of a binary mask: every clear region with no
/// 4-connected path to the image border is set.
///
/// Panics: panics if the image data is smaller than stride*height, if stride
/// is smaller than width, or if the dimensions of `src` and `dst` differ.
#[inline]
pub fn fill_holes<SRC, DST>(src: &SRC, dst: &mut DST)
where
    SRC: ImageStride<Mono8>,
    DST: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    assert_same_dims_mono8(src, dst);
    let width = src.width() as usize;
    let height = src.height() as usize;
    let src_stride = src.stride();
    let src_data = src.image_data();

    // Flood the clear region reachable from the border.
    let mut outside = vec![false; width * height];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let push_if_clear = |r: usize, c: usize, outside: &mut Vec<bool>, stack: &mut Vec<(usize, usize)>| {
        if src_data[r * src_stride + c] == 0 && !outside[r * width + c] {
            outside[r * width + c] = true;
            stack.push((r, c));
        }
    };
    for c in 0..width {
        push_if_clear(0, c, &mut outside, &mut stack);
        push_if_clear(height - 1, c, &mut outside, &mut stack);
    }
    for r in 0..height {
        push_if_clear(r, 0, &mut outside, &mut stack);
        push_if_clear(r, width - 1, &mut outside, &mut stack);
    }
    while let Some((r, c)) = stack.pop() {
        if r > 0 {
            push_if_clear(r - 1, c, &mut outside, &mut stack);
        }
        if r + 1 < height {
            push_if_clear(r + 1, c, &mut outside, &mut stack);
        }
        if c > 0 {
            push_if_clear(r, c - 1, &mut outside, &mut stack);
        }
        if c + 1 < width {
            push_if_clear(r, c + 1, &mut outside, &mut stack);
        }
    }

    let dst_stride = dst.stride();
    let dst_full = dst.buffer_mut_ref();
    for r in 0..height {
        for c in 0..width {
            dst_full.data[r * dst_stride + c] = if outside[r * width + c] { 0 } else { 255 };
        }
    }
}

/// In-place logical AND of two masks: `im &= other`.
///
/// Panics: as for [`fill_holes`].
#[inline]
pub fn mask_and<IM, SRC>(mut im: IM, other: &SRC) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
    SRC: ImageStride<Mono8>,
{
    combine(&mut im, other, |a, b| a && b);
    im
}

/// In-place logical OR of two masks: `im |= other`.
///
/// Panics: as for [`fill_holes`].
#[inline]
pub fn mask_or<IM, SRC>(mut im: IM, other: &SRC) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
    SRC: ImageStride<Mono8>,
{
    combine(&mut im, other, |a, b| a || b);
    im
}

/// In-place logical XOR of two masks: `im ^= other`.
///
/// Panics: as for [`fill_holes`].
#[inline]
pub fn mask_xor<IM, SRC>(mut im: IM, other: &SRC) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
    SRC: ImageStride<Mono8>,
{
    combine(&mut im, other, |a, b| a != b);
    im
}

/// In-place logical difference: clear every pixel of `im` that is set in
/// `other`.
///
/// Panics: as for [`fill_holes`].
#[inline]
pub fn mask_diff<IM, SRC>(mut im: IM, other: &SRC) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
    SRC: ImageStride<Mono8>,
{
    combine(&mut im, other, |a, b| a && !b);
    im
}

/// In-place logical NOT of a mask.
///
/// Panics: panics if the image data is smaller than stride*height or if
/// stride is smaller than width.
#[inline]
pub fn mask_not<IM>(mut im: IM) -> IM
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
{
    let stride = im.stride();
    let width = im.width() as usize;
    let datalen = im.height() as usize * stride;
    let full_data = im.buffer_mut_ref();
    let data = &mut full_data.data[..datalen];
    for rowdata in data.chunks_exact_mut(stride) {
        for x in rowdata[..width].iter_mut() {
            *x = if *x == 0 { 255 } else { 0 };
        }
    }
    im
}

fn combine<IM, SRC>(im: &mut IM, other: &SRC, op: impl Fn(bool, bool) -> bool)
where
    IM: ImageStride<Mono8> + ImageMutData<Mono8>,
    SRC: ImageStride<Mono8>,
{
    assert!(
        im.width() == other.width() && im.height() == other.height(),
        "mask dimensions differ"
    );
    let width = im.width() as usize;
    let height = im.height() as usize;
    let im_stride = im.stride();
    let other_stride = other.stride();
    let other_data = other.image_data();
    let im_full = im.buffer_mut_ref();
    for r in 0..height {
        let other_row = mono8_row(other_data, other_stride, width, r);
        let im_row = &mut im_full.data[r * im_stride..][..width];
        for (x, &y) in im_row.iter_mut().zip(other_row.iter()) {
            *x = if op(*x != 0, y != 0) { 255 } else { 0 };
        }
    }
}

/// Count the set pixels of a mask.
///
/// Panics: panics if the image data is smaller than stride*height or if
/// stride is smaller than width.
#[inline]
pub fn count_set<IM>(im: &IM) -> usize
where
    IM: ImageStride<Mono8>,
{
    let stride = im.stride();
    let width = im.width() as usize;
    let data = im.image_data();
    let mut n = 0;
    for r in 0..im.height() as usize {
        n += mono8_row(data, stride, width, r)
            .iter()
            .filter(|&&px| px != 0)
            .count();
    }
    n
}

fn binomial_taps(ksize: usize) -> (&'static [u32], u32) {
    match ksize {
        3 => (&[1, 2, 1], 2),
        5 => (&[1, 4, 6, 4, 1], 4),
        7 => (&[1, 6, 15, 20, 15, 6, 1], 6),
        _ => panic!("unsupported Gaussian kernel size {ksize}"),
    }
}

/// Gaussian blur of an RGB8 image with a binomial kernel of size 3, 5 or 7,
/// separable fixed-point implementation, border replicated.
///
/// Panics: panics if the image data is smaller than the image dimensions
/// require, if the dimensions of `src` and `dst` differ, or if `ksize` is
/// not 3, 5 or 7.
#[inline]
pub fn gaussian_blur_rgb8<SRC, DST>(src: &SRC, dst: &mut DST, ksize: usize)
where
    SRC: ImageStride<RGB8>,
    DST: ImageStride<RGB8> + ImageMutData<RGB8>,
{
    assert!(
        src.width() == dst.width() && src.height() == dst.height(),
        "source and destination dimensions differ"
    );
    let (taps, shift) = binomial_taps(ksize);
    let half = taps.len() / 2;
    let round = 1u32 << (shift - 1);
    let width = src.width() as usize;
    let height = src.height() as usize;
    let row_bytes = width * 3;
    let src_stride = src.stride();
    let src_data = src.image_data();

    // Horizontal pass into a packed scratch buffer.
    let mut tmp = vec![0u8; row_bytes * height];
    for r in 0..height {
        let row = &src_data[r * src_stride..][..row_bytes];
        let out = &mut tmp[r * row_bytes..][..row_bytes];
        for c in 0..width {
            for ch in 0..3 {
                let mut acc = 0u32;
                for (i, &t) in taps.iter().enumerate() {
                    let cc = clamp_index(c as isize + i as isize - half as isize, width);
                    acc += t * row[cc * 3 + ch] as u32;
                }
                out[c * 3 + ch] = ((acc + round) >> shift) as u8;
            }
        }
    }

    // Vertical pass into the destination.
    let dst_stride = dst.stride();
    let dst_full = dst.buffer_mut_ref();
    for r in 0..height {
        let out = &mut dst_full.data[r * dst_stride..][..row_bytes];
        for c in 0..width {
            for ch in 0..3 {
                let mut acc = 0u32;
                for (i, &t) in taps.iter().enumerate() {
                    let rr = clamp_index(r as isize + i as isize - half as isize, height);
                    acc += t * tmp[rr * row_bytes + c * 3 + ch] as u32;
                }
                out[c * 3 + ch] = ((acc + round) >> shift) as u8;
            }
        }
    }
}
