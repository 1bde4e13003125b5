//! Randomized bank refresh and opportunistic sample replacement.

use machine_vision_formats::pixel_format::Mono8;
use plain_frame::PlainFrame;
use rand::Rng;

use crate::bank::WordBank;

/// Draw a center-weighted spatial offset from `[-halfwidth, halfwidth]`
/// on each axis (sum of two uniform draws, i.e. triangular).
pub(crate) fn triangular_offset<R: Rng>(rng: &mut R, halfwidth: i32) -> (i32, i32) {
    let dr = rng.random_range(0..=halfwidth) + rng.random_range(0..=halfwidth) - halfwidth;
    let dc = rng.random_range(0..=halfwidth) + rng.random_range(0..=halfwidth) - halfwidth;
    (dr, dc)
}

/// Reseed a fraction of every eligible bank from spatial neighbors.
///
/// For each eligible pixel, `ceil(fraction * words_no)` contiguous slots
/// (wrapping, from a random start) adopt the last-observed descriptor of
/// a neighbor drawn from a triangular window, clamped to the frame.
/// Foreground pixels are skipped unless `force_foreground`; masked pixels
/// (nonzero in `roi_mask`) are never touched and never sampled from.
#[allow(clippy::too_many_arguments)]
pub(crate) fn refresh_banks<R: Rng>(
    bank: &mut WordBank,
    width: usize,
    height: usize,
    raw_fg: Option<&PlainFrame<Mono8>>,
    fraction: f32,
    force_foreground: bool,
    halfwidth: i32,
    now: u32,
    rng: &mut R,
    roi_mask: Option<&PlainFrame<Mono8>>,
) {
    let words_no = bank.words_no();
    let n_slots = ((fraction * words_no as f32).ceil() as usize).clamp(1, words_no);
    let masked = |row: usize, col: usize| match roi_mask {
        Some(roi) => roi.pixel_slice(row as u32, col as u32)[0] != 0,
        None => false,
    };
    for row in 0..height {
        for col in 0..width {
            if masked(row, col) {
                continue;
            }
            if !force_foreground {
                if let Some(raw) = raw_fg {
                    if raw.pixel_slice(row as u32, col as u32)[0] != 0 {
                        continue;
                    }
                }
            }
            let pix = row * width + col;
            let start = rng.random_range(0..words_no);
            for k in 0..n_slots {
                let slot = (start + k) % words_no;
                let (dr, dc) = triangular_offset(rng, halfwidth);
                let nr = (row as i64 + dr as i64).clamp(0, height as i64 - 1) as usize;
                let nc = (col as i64 + dc as i64).clamp(0, width as i64 - 1) as usize;
                let src = if masked(nr, nc) { pix } else { nr * width + nc };
                bank.adopt_last_observed(src, pix, slot, now);
            }
        }
    }
}

/// Per-frame stochastic model maintenance for background pixels.
///
/// Each background pixel replaces a random slot of its own bank with its
/// current descriptor with probability `1/T(x)`, and (when spreading is
/// enabled) pushes that descriptor into a random slot of a random
/// neighbor with the same per-pixel probability.
#[allow(clippy::too_many_arguments)]
pub(crate) fn stochastic_updates<R: Rng>(
    bank: &mut WordBank,
    width: usize,
    height: usize,
    raw_fg: &PlainFrame<Mono8>,
    update_interval: &[f32],
    replace_enabled: bool,
    spread_enabled: bool,
    spread_offsets: &[(i32, i32)],
    now: u32,
    rng: &mut R,
    roi_mask: Option<&PlainFrame<Mono8>>,
) {
    if !replace_enabled {
        return;
    }
    let words_no = bank.words_no();
    let masked = |row: usize, col: usize| match roi_mask {
        Some(roi) => roi.pixel_slice(row as u32, col as u32)[0] != 0,
        None => false,
    };
    for row in 0..height {
        for col in 0..width {
            if masked(row, col) {
                continue;
            }
            if raw_fg.pixel_slice(row as u32, col as u32)[0] != 0 {
                continue;
            }
            let pix = row * width + col;
            let p_update = 1.0 / update_interval[pix];
            if rng.random::<f32>() < p_update {
                let slot = rng.random_range(0..words_no);
                bank.adopt_last_observed(pix, pix, slot, now);
            }
            if spread_enabled && rng.random::<f32>() < p_update {
                let (dr, dc) = spread_offsets[rng.random_range(0..spread_offsets.len())];
                let nr = (row as i64 + dr as i64).clamp(0, height as i64 - 1) as usize;
                let nc = (col as i64 + dc as i64).clamp(0, width as i64 - 1) as usize;
                if masked(nr, nc) {
                    continue;
                }
                let slot = rng.random_range(0..words_no);
                bank.adopt_last_observed(pix, nr * width + nc, slot, now);
            }
        }
    }
}
