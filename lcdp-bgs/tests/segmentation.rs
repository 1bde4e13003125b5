use test_log::test;

use std::ops::Range;

use machine_vision_formats::{
    pixel_format::{Mono8, RGB8},
    ImageData, ImageStride,
};
use plain_frame::PlainFrame;

use lcdp_bgs::{
    ImageOps, LcdpBackgroundSubtractor, LcdpSegCfg, NeighborhoodPattern, StdImageOps,
};

fn gray(width: u32, height: u32, value: u8) -> PlainFrame<RGB8> {
    PlainFrame::filled(width, height, value)
}

fn paint_block(frame: &mut PlainFrame<RGB8>, rows: Range<u32>, cols: Range<u32>, color: [u8; 3]) {
    for r in rows {
        for c in cols.clone() {
            frame.pixel_slice_mut(r, c).copy_from_slice(&color);
        }
    }
}

fn set_positions(mask: &PlainFrame<Mono8>) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for r in 0..mask.height {
        for c in 0..mask.width {
            if mask.pixel_slice(r, c)[0] != 0 {
                out.push((r, c));
            }
        }
    }
    out
}

#[test]
fn uniform_video_converges_to_background() {
    let cfg = lcdp_bgs_cfg::deterministic_test_profile();
    let mut bgs = LcdpBackgroundSubtractor::new(cfg, 8, 8).unwrap();
    for _ in 0..60 {
        let mask = bgs.process_frame(&gray(8, 8, 128)).unwrap();
        assert_eq!(maskops::count_set(mask), 0);
    }
    let fb = bgs.feedback().unwrap();
    for &m in fb.mean_raw_segm_short() {
        assert!(m < 1e-6);
    }
    for &r in fb.distance_threshold() {
        approx::assert_relative_eq!(r, 1.0);
    }
}

// the 4x4 gray scene: ten identical frames train an all-gray model with
// settled thresholds, then a single 2x2 black square is flagged exactly
#[test]
fn black_square_on_trained_gray_flags_exactly_the_square() {
    let cfg = LcdpSegCfg {
        words_no: 4,
        ..lcdp_bgs_cfg::deterministic_test_profile()
    };
    let mut bgs = LcdpBackgroundSubtractor::new(cfg, 4, 4).unwrap();
    for _ in 0..10 {
        let mask = bgs.process_frame(&gray(4, 4, 128)).unwrap();
        assert_eq!(maskops::count_set(mask), 0);
    }
    let bank = bgs.bank().unwrap();
    for pix in 0..16 {
        assert_eq!(bank.seeded_count(pix), 4);
        for slot in 0..4 {
            assert_eq!(bank.word(pix, slot).color, [128, 128, 128]);
        }
    }
    for &r in bgs.feedback().unwrap().distance_threshold() {
        approx::assert_relative_eq!(r, 1.0);
    }

    let mut frame = gray(4, 4, 128);
    paint_block(&mut frame, 1..3, 1..3, [0, 0, 0]);
    let mask = bgs.process_frame(&frame).unwrap();
    assert_eq!(set_positions(mask), vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
}

#[test]
fn one_frame_color_block_is_foreground_inside_background_outside() {
    let cfg = lcdp_bgs_cfg::deterministic_test_profile();
    let mut bgs = LcdpBackgroundSubtractor::new(cfg, 20, 20).unwrap();
    for _ in 0..20 {
        bgs.process_frame(&gray(20, 20, 128)).unwrap();
    }
    let mut frame = gray(20, 20, 128);
    paint_block(&mut frame, 6..14, 6..14, [200, 30, 30]);
    let mask = bgs.process_frame(&frame).unwrap();
    // interior of the block (inset past the blur bleed) is foreground
    for r in 8..12 {
        for c in 8..12 {
            assert_eq!(mask.pixel_slice(r, c)[0], 255, "({r},{c})");
        }
    }
    // pixels well clear of the block stay background
    for r in 0..20u32 {
        for c in 0..20u32 {
            if (4..16).contains(&r) && (4..16).contains(&c) {
                continue;
            }
            assert_eq!(mask.pixel_slice(r, c)[0], 0, "({r},{c})");
        }
    }
}

#[test]
fn blink_mask_tracks_label_flips() {
    let cfg = lcdp_bgs_cfg::deterministic_test_profile();
    let mut bgs = LcdpBackgroundSubtractor::new(cfg, 6, 6).unwrap();
    for _ in 0..10 {
        bgs.process_frame(&gray(6, 6, 128)).unwrap();
    }
    assert_eq!(maskops::count_set(bgs.blink_mask().unwrap()), 0);

    let mut frame = gray(6, 6, 128);
    paint_block(&mut frame, 2..4, 2..4, [0, 0, 0]);
    bgs.process_frame(&frame).unwrap();
    // four labels flipped to foreground
    assert_eq!(maskops::count_set(bgs.blink_mask().unwrap()), 4);
    assert_eq!(maskops::count_set(bgs.final_mask().unwrap()), 4);

    // the square vanishes again: the same labels flip back, and the
    // final mask is clean
    bgs.process_frame(&gray(6, 6, 128)).unwrap();
    assert_eq!(maskops::count_set(bgs.blink_mask().unwrap()), 4);
    assert_eq!(maskops::count_set(bgs.final_mask().unwrap()), 0);
}

fn moving_scene(width: u32, height: u32, step: u32) -> PlainFrame<RGB8> {
    let mut frame = PlainFrame::zeros(width, height);
    for r in 0..height {
        for c in 0..width {
            let v = 60 + 6 * r as u8;
            frame.pixel_slice_mut(r, c).copy_from_slice(&[v, v, v]);
        }
    }
    let left = step % (width - 3);
    paint_block(&mut frame, 2..5, left..left + 3, [10, 10, 10]);
    frame
}

#[test]
fn identical_seeds_give_identical_runs() {
    let mut cfg = lcdp_bgs_cfg::default_8_neighbors();
    cfg.rng_seed = 7;
    cfg.refresh_interval = 3;
    let mut a = LcdpBackgroundSubtractor::new(cfg.clone(), 12, 10).unwrap();
    let mut b = LcdpBackgroundSubtractor::new(cfg, 12, 10).unwrap();
    for step in 0..12 {
        let frame = moving_scene(12, 10, step);
        let ma = a.process_frame(&frame).unwrap();
        let mb = b.process_frame(&frame).unwrap();
        assert_eq!(ma.image_data(), mb.image_data(), "frame {step}");
    }
    let fa = a.feedback().unwrap();
    let fb = b.feedback().unwrap();
    assert_eq!(fa.distance_threshold(), fb.distance_threshold());
    assert_eq!(fa.update_interval(), fb.update_interval());
    let (ba, bb) = (a.bank().unwrap(), b.bank().unwrap());
    for pix in 0..120 {
        assert_eq!(ba.seeded_count(pix), bb.seeded_count(pix));
    }
}

#[test]
fn sixteen_point_neighborhood_has_code_length_144() {
    let cfg = LcdpSegCfg {
        neighborhood: NeighborhoodPattern::Points16,
        ..lcdp_bgs_cfg::deterministic_test_profile()
    };
    let mut bgs = LcdpBackgroundSubtractor::new(cfg, 8, 8).unwrap();
    bgs.process_frame(&gray(8, 8, 90)).unwrap();
    assert_eq!(bgs.bank().unwrap().code_len(), 144);
    assert_eq!(maskops::count_set(bgs.final_mask().unwrap()), 0);
}

#[test]
fn roi_masked_region_is_never_foreground_or_modeled() {
    let cfg = lcdp_bgs_cfg::deterministic_test_profile();
    let mut bgs = LcdpBackgroundSubtractor::new(cfg, 8, 8).unwrap();
    let mut roi = PlainFrame::<Mono8>::zeros(8, 8);
    for r in 0..8 {
        for c in 4..8 {
            roi.pixel_slice_mut(r, c)[0] = 255;
        }
    }
    bgs.set_roi(roi).unwrap();
    for _ in 0..5 {
        bgs.process_frame(&gray(8, 8, 128)).unwrap();
    }
    // an intrusion confined to the masked half stays invisible
    let mut frame = gray(8, 8, 128);
    paint_block(&mut frame, 2..6, 5..8, [0, 0, 0]);
    let mask = bgs.process_frame(&frame).unwrap();
    assert_eq!(maskops::count_set(mask), 0);
    // masked pixels were never seeded, live pixels were
    let bank = bgs.bank().unwrap();
    assert_eq!(bank.seeded_count(6), 0);
    assert!(bank.seeded_count(1) > 0);
    // the live half still detects changes
    let mut frame2 = gray(8, 8, 128);
    paint_block(&mut frame2, 2..4, 0..2, [255, 255, 255]);
    let mask = bgs.process_frame(&frame2).unwrap();
    assert!(maskops::count_set(mask) > 0);
}

#[derive(Clone, Copy, Default, Debug)]
struct StageCounts {
    blurs: usize,
    medians: usize,
    opens: usize,
    closes: usize,
    fills: usize,
}

/// Delegating [`ImageOps`] that records which stages ran.
struct CountingOps {
    counts: std::rc::Rc<std::cell::RefCell<StageCounts>>,
    std: StdImageOps,
}

impl ImageOps for CountingOps {
    fn gaussian_blur_rgb8<S: ImageStride<RGB8>>(
        &self,
        src: &S,
        dst: &mut PlainFrame<RGB8>,
        ksize: usize,
    ) {
        self.counts.borrow_mut().blurs += 1;
        self.std.gaussian_blur_rgb8(src, dst, ksize);
    }

    fn median_binary(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize) {
        self.counts.borrow_mut().medians += 1;
        self.std.median_binary(src, dst, ksize);
    }

    fn dilate(
        &self,
        src: &PlainFrame<Mono8>,
        dst: &mut PlainFrame<Mono8>,
        ksize: usize,
        iterations: usize,
    ) {
        self.std.dilate(src, dst, ksize, iterations);
    }

    fn erode(
        &self,
        src: &PlainFrame<Mono8>,
        dst: &mut PlainFrame<Mono8>,
        ksize: usize,
        iterations: usize,
    ) {
        self.std.erode(src, dst, ksize, iterations);
    }

    fn open(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize) {
        self.counts.borrow_mut().opens += 1;
        self.std.open(src, dst, ksize);
    }

    fn close(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize) {
        self.counts.borrow_mut().closes += 1;
        self.std.close(src, dst, ksize);
    }

    fn fill_holes(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>) {
        self.counts.borrow_mut().fills += 1;
        self.std.fill_holes(src, dst);
    }
}

#[test]
fn substituted_ops_see_every_pipeline_stage() {
    let counts = std::rc::Rc::new(std::cell::RefCell::new(StageCounts::default()));
    let ops = CountingOps {
        counts: counts.clone(),
        std: StdImageOps,
    };
    let cfg = lcdp_bgs_cfg::deterministic_test_profile();
    let mut bgs = LcdpBackgroundSubtractor::with_ops(cfg, 6, 6, ops).unwrap();
    bgs.process_frame(&gray(6, 6, 128)).unwrap();
    // the first frame blurs twice: once to seed, once to classify
    let c = *counts.borrow();
    assert_eq!(c.blurs, 2);
    assert_eq!(c.medians, 1);
    assert_eq!(c.opens, 2); // morphological open plus the flicker open
    assert_eq!(c.closes, 1);
    assert_eq!(c.fills, 1);

    bgs.process_frame(&gray(6, 6, 128)).unwrap();
    let c = *counts.borrow();
    assert_eq!(c.blurs, 3);
    assert_eq!(c.medians, 2);
    assert_eq!(c.opens, 4);
    assert_eq!(c.closes, 2);
    assert_eq!(c.fills, 2);
}
