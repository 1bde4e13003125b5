//! Per-pixel classification against the word bank.

use machine_vision_formats::pixel_format::Mono8;
use plain_frame::PlainFrame;

use lcdp_bgs_types::{LcdpSegCfg, MatchCombination};

use crate::bank::WordBank;

/// Matching parameters derived once from the configuration.
#[derive(Debug, Clone)]
pub(crate) struct MatchParams {
    pub rgb_check_enabled: bool,
    pub rgb_threshold: i16,
    /// Largest per-position code deviation that still counts as agreement.
    pub code_tolerance: i16,
    pub lcdp_base: f32,
    pub lcdp_max: f32,
    pub combination: MatchCombination,
    pub required_matches: u32,
}

impl MatchParams {
    pub fn from_cfg(cfg: &LcdpSegCfg) -> Self {
        Self {
            rgb_check_enabled: cfg.rgb_check_enabled,
            rgb_threshold: cfg.rgb_threshold as i16,
            code_tolerance: (cfg.color_diff_ratio * 255.0).round() as i16,
            lcdp_base: cfg.lcdp_threshold,
            lcdp_max: cfg.lcdp_max_threshold,
            combination: cfg.match_combination,
            required_matches: cfg.required_word_matches,
        }
    }
}

/// Outcome of classifying one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PixelVerdict {
    pub is_background: bool,
    /// Smallest normalized distance to any seeded word, 1.0 when the bank
    /// is empty.
    pub min_dist: f32,
}

/// Classify the descriptor at `pix` against its bank.
///
/// Matched words get their bookkeeping updated; the scan stops as soon as
/// the required match count is reached.
pub(crate) fn classify_pixel(
    bank: &mut WordBank,
    pix: usize,
    color: [u8; 3],
    code: &[i16],
    distance_threshold: f32,
    p: &MatchParams,
    now: u32,
) -> PixelVerdict {
    let lcdp_thresh = (p.lcdp_base * distance_threshold).min(p.lcdp_max);
    let code_len = code.len() as f32;
    let mut matches = 0u32;
    let mut min_dist = 1.0f32;

    for slot in 0..bank.words_no() {
        let word = *bank.word(pix, slot);
        if word.observed_since == 0 {
            continue;
        }

        let color_dev = color
            .iter()
            .zip(word.color.iter())
            .map(|(&a, &b)| (a as i16 - b as i16).abs())
            .max()
            .unwrap_or(0);
        let color_ok = color_dev <= p.rgb_threshold;
        let color_dist = color_dev as f32 / 255.0;

        let stored = bank.code(pix, slot);
        let disagreements = code
            .iter()
            .zip(stored.iter())
            .filter(|&(&a, &b)| (a - b).abs() > p.code_tolerance)
            .count();
        let texture_dist = disagreements as f32 / code_len;
        let texture_ok = texture_dist <= lcdp_thresh;

        let dist = if p.rgb_check_enabled {
            0.5 * (color_dist + texture_dist)
        } else {
            texture_dist
        };
        if dist < min_dist {
            min_dist = dist;
        }

        let matched = if p.rgb_check_enabled {
            match p.combination {
                MatchCombination::And => color_ok && texture_ok,
                MatchCombination::Or => color_ok || texture_ok,
            }
        } else {
            texture_ok
        };

        if matched {
            let word = bank.word_mut(pix, slot);
            word.last_matched = now;
            word.match_count = word.match_count.saturating_add(1);
            matches += 1;
            if matches >= p.required_matches {
                break;
            }
        }
    }

    PixelVerdict {
        is_background: matches >= p.required_matches,
        min_dist,
    }
}

/// Demote lonely background labels: a background pixel keeps its label
/// only when at least `min_neighbors` of its pattern neighbors (those
/// inside the frame) are background too. Pixels set in `skip` keep their
/// label untouched. Double buffered via `scratch`, so the decision for
/// every pixel reads the original labels.
pub(crate) fn consensus_pass(
    labels: &mut PlainFrame<Mono8>,
    scratch: &mut PlainFrame<Mono8>,
    offsets: &[(i32, i32)],
    min_neighbors: u32,
    skip: Option<&PlainFrame<Mono8>>,
) {
    scratch.assign(labels);
    let width = labels.width as i64;
    let height = labels.height as i64;
    for row in 0..height {
        for col in 0..width {
            if scratch.pixel_slice(row as u32, col as u32)[0] != 0 {
                continue; // already foreground
            }
            if let Some(skip) = skip {
                if skip.pixel_slice(row as u32, col as u32)[0] != 0 {
                    continue;
                }
            }
            let mut bg_neighbors = 0u32;
            for &(dr, dc) in offsets {
                let nr = row + dr as i64;
                let nc = col + dc as i64;
                if nr < 0 || nr >= height || nc < 0 || nc >= width {
                    continue;
                }
                if scratch.pixel_slice(nr as u32, nc as u32)[0] == 0 {
                    bg_neighbors += 1;
                }
            }
            if bg_neighbors < min_neighbors {
                labels.pixel_slice_mut(row as u32, col as u32)[0] = 255;
            }
        }
    }
}
