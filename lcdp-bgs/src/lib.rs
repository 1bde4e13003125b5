//! Adaptive per-pixel background subtraction for RGB video.
//!
//! Every pixel keeps a bounded bank of historical descriptors (color plus
//! a local color-difference code). Incoming pixels are matched against
//! their bank under per-pixel adaptive thresholds; a feedback controller
//! tunes the thresholds and update rates from the segmentation noise, and
//! a randomized refresh policy keeps the banks current.

use machine_vision_formats::{
    pixel_format::{Mono8, RGB8},
    ImageStride,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use itertools::izip;
use plain_frame::PlainFrame;

mod bank;
mod classify;
pub mod descriptor;
mod errors;
mod feedback;
mod refresh;

pub use crate::bank::{Word, WordBank};
pub use crate::errors::{Error, Result};
pub use crate::feedback::FeedbackState;
pub use lcdp_bgs_types::{LcdpSegCfg, MatchCombination, NeighborhoodPattern};

use crate::classify::MatchParams;
use crate::feedback::FeedbackParams;

/// Image-processing collaborator for the frame pipeline.
///
/// [`StdImageOps`] delegates to [`maskops`]; tests can substitute an
/// implementation to observe or alter the pre/post-processing stages.
pub trait ImageOps {
    fn gaussian_blur_rgb8<S: ImageStride<RGB8>>(
        &self,
        src: &S,
        dst: &mut PlainFrame<RGB8>,
        ksize: usize,
    );
    fn median_binary(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize);
    fn dilate(
        &self,
        src: &PlainFrame<Mono8>,
        dst: &mut PlainFrame<Mono8>,
        ksize: usize,
        iterations: usize,
    );
    fn erode(
        &self,
        src: &PlainFrame<Mono8>,
        dst: &mut PlainFrame<Mono8>,
        ksize: usize,
        iterations: usize,
    );
    fn open(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize);
    fn close(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize);
    fn fill_holes(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>);
}

/// The default [`ImageOps`] implementation, backed by [`maskops`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdImageOps;

impl ImageOps for StdImageOps {
    fn gaussian_blur_rgb8<S: ImageStride<RGB8>>(
        &self,
        src: &S,
        dst: &mut PlainFrame<RGB8>,
        ksize: usize,
    ) {
        maskops::gaussian_blur_rgb8(src, dst, ksize);
    }

    fn median_binary(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize) {
        maskops::median_binary(src, dst, ksize);
    }

    fn dilate(
        &self,
        src: &PlainFrame<Mono8>,
        dst: &mut PlainFrame<Mono8>,
        ksize: usize,
        iterations: usize,
    ) {
        maskops::dilate(src, dst, ksize);
        if iterations > 1 {
            let mut tmp = PlainFrame::<Mono8>::zeros(dst.width, dst.height);
            for _ in 1..iterations {
                tmp.assign(dst);
                maskops::dilate(&tmp, dst, ksize);
            }
        }
    }

    fn erode(
        &self,
        src: &PlainFrame<Mono8>,
        dst: &mut PlainFrame<Mono8>,
        ksize: usize,
        iterations: usize,
    ) {
        maskops::erode(src, dst, ksize);
        if iterations > 1 {
            let mut tmp = PlainFrame::<Mono8>::zeros(dst.width, dst.height);
            for _ in 1..iterations {
                tmp.assign(dst);
                maskops::erode(&tmp, dst, ksize);
            }
        }
    }

    fn open(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize) {
        maskops::open(src, dst, ksize);
    }

    fn close(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>, ksize: usize) {
        maskops::close(src, dst, ksize);
    }

    fn fill_holes(&self, src: &PlainFrame<Mono8>, dst: &mut PlainFrame<Mono8>) {
        maskops::fill_holes(src, dst);
    }
}

/// Everything owned by a running model.
struct RunningState {
    bank: WordBank,
    feedback: FeedbackState,
    match_params: MatchParams,
    feedback_params: FeedbackParams,
    rng: ChaCha8Rng,
    /// Frames processed so far; doubles as the bank timestamp.
    frame_index: u32,
    frames_since_refresh: u32,
    blurred: PlainFrame<RGB8>,
    raw_mask: PlainFrame<Mono8>,
    prev_raw_mask: PlainFrame<Mono8>,
    blink_mask: PlainFrame<Mono8>,
    prev_blink_mask: PlainFrame<Mono8>,
    final_mask: PlainFrame<Mono8>,
    history_t1: PlainFrame<Mono8>,
    history_t2: PlainFrame<Mono8>,
    scratch_a: PlainFrame<Mono8>,
    scratch_b: PlainFrame<Mono8>,
    code_buf: Vec<i16>,
    min_dist_buf: Vec<f32>,
}

impl std::fmt::Debug for RunningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningState")
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum ModelState {
    Uninitialized,
    Running(RunningState),
    Finalized,
    /// Placeholder while a frame is being processed.
    TemporaryHold,
}

/// Per-pixel adaptive background subtractor.
///
/// Feed RGB frames of fixed dimensions with [`process_frame`]; the first
/// frame seeds the model, every frame returns a 0/255 foreground mask.
///
/// [`process_frame`]: LcdpBackgroundSubtractor::process_frame
pub struct LcdpBackgroundSubtractor<Ops: ImageOps = StdImageOps> {
    cfg: LcdpSegCfg,
    width: u32,
    height: u32,
    roi: Option<PlainFrame<Mono8>>,
    state: ModelState,
    ops: Ops,
}

impl<Ops: ImageOps> std::fmt::Debug for LcdpBackgroundSubtractor<Ops> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LcdpBackgroundSubtractor")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LcdpBackgroundSubtractor<StdImageOps> {
    pub fn new(cfg: LcdpSegCfg, width: u32, height: u32) -> Result<Self> {
        Self::with_ops(cfg, width, height, StdImageOps)
    }
}

impl<Ops: ImageOps> LcdpBackgroundSubtractor<Ops> {
    pub fn with_ops(cfg: LcdpSegCfg, width: u32, height: u32, ops: Ops) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidConfig(format!(
                "frame dimensions must be nonzero, got {width}x{height}"
            )));
        }
        cfg.validate().map_err(Error::InvalidConfig)?;
        Ok(Self {
            cfg,
            width,
            height,
            roi: None,
            state: ModelState::Uninitialized,
            ops,
        })
    }

    /// Classify one frame and return the final foreground mask.
    ///
    /// The first frame seeds the background model and is then processed
    /// like any other. Frames whose dimensions differ from the
    /// constructor's fail with [`Error::ImageSizeChanged`] and leave the
    /// model untouched.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn process_frame<S: ImageStride<RGB8>>(&mut self, frame: &S) -> Result<&PlainFrame<Mono8>> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(Error::ImageSizeChanged);
        }
        let state = std::mem::replace(&mut self.state, ModelState::TemporaryHold);
        let st = match state {
            ModelState::Uninitialized => {
                let mut st = self.allocate_state();
                self.seed_model(&mut st, frame);
                self.run_frame(st, frame)
            }
            ModelState::Running(st) => self.run_frame(st, frame),
            ModelState::Finalized => {
                self.state = ModelState::Finalized;
                return Err(Error::Finalized);
            }
            ModelState::TemporaryHold => {
                panic!("unreachable");
            }
        };
        self.state = ModelState::Running(st);
        match &self.state {
            ModelState::Running(st) => Ok(&st.final_mask),
            _ => panic!("unreachable"),
        }
    }

    /// Install a region-of-interest mask of the frame dimensions.
    ///
    /// Nonzero mask pixels are excluded from segmentation: always labeled
    /// background and never classified, updated or sampled from.
    pub fn set_roi(&mut self, roi: PlainFrame<Mono8>) -> Result<()> {
        if roi.width != self.width || roi.height != self.height {
            return Err(Error::RoiSizeMismatch);
        }
        self.roi = Some(roi);
        Ok(())
    }

    pub fn clear_roi(&mut self) {
        self.roi = None;
    }

    /// Discard the model; the next frame reseeds from scratch.
    pub fn reset(&mut self) {
        self.state = ModelState::Uninitialized;
    }

    /// Stop processing for good; further frames fail with
    /// [`Error::Finalized`].
    pub fn finalize(&mut self) {
        self.state = ModelState::Finalized;
    }

    pub fn config(&self) -> &LcdpSegCfg {
        &self.cfg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn running(&self) -> Option<&RunningState> {
        match &self.state {
            ModelState::Running(st) => Some(st),
            _ => None,
        }
    }

    /// Post-processed mask of the most recent frame.
    pub fn final_mask(&self) -> Option<&PlainFrame<Mono8>> {
        self.running().map(|st| &st.final_mask)
    }

    /// Pre-cleanup classification of the most recent frame.
    pub fn raw_mask(&self) -> Option<&PlainFrame<Mono8>> {
        self.running().map(|st| &st.raw_mask)
    }

    /// Pixels whose raw label flipped on the most recent frame.
    pub fn blink_mask(&self) -> Option<&PlainFrame<Mono8>> {
        self.running().map(|st| &st.blink_mask)
    }

    /// Final masks of the most recent frame and the one before it.
    pub fn history_masks(&self) -> Option<(&PlainFrame<Mono8>, &PlainFrame<Mono8>)> {
        self.running().map(|st| (&st.history_t1, &st.history_t2))
    }

    /// Per-pixel controller state (thresholds, rates, running means).
    pub fn feedback(&self) -> Option<&FeedbackState> {
        self.running().map(|st| &st.feedback)
    }

    pub fn bank(&self) -> Option<&WordBank> {
        self.running().map(|st| &st.bank)
    }

    fn is_masked(&self, row: u32, col: u32) -> bool {
        match &self.roi {
            Some(roi) => roi.pixel_slice(row, col)[0] != 0,
            None => false,
        }
    }

    fn allocate_state(&self) -> RunningState {
        let n_pixels = self.width as usize * self.height as usize;
        let live_pixels = match &self.roi {
            Some(roi) => n_pixels - maskops::count_set(roi),
            None => n_pixels,
        };
        let feedback_params = FeedbackParams::from_cfg(&self.cfg, live_pixels);
        let bank = WordBank::new(n_pixels, self.cfg.words_no as usize, self.cfg.neighborhood);
        debug!(
            width = self.width,
            height = self.height,
            words_no = self.cfg.words_no,
            code_len = bank.code_len(),
            live_pixels,
            "allocating model state"
        );
        RunningState {
            code_buf: vec![0; bank.code_len()],
            min_dist_buf: vec![0.0; n_pixels],
            feedback: FeedbackState::new(n_pixels, &feedback_params),
            bank,
            match_params: MatchParams::from_cfg(&self.cfg),
            feedback_params,
            rng: ChaCha8Rng::seed_from_u64(self.cfg.rng_seed),
            frame_index: 0,
            frames_since_refresh: 0,
            blurred: PlainFrame::zeros(self.width, self.height),
            raw_mask: PlainFrame::zeros(self.width, self.height),
            prev_raw_mask: PlainFrame::zeros(self.width, self.height),
            blink_mask: PlainFrame::zeros(self.width, self.height),
            prev_blink_mask: PlainFrame::zeros(self.width, self.height),
            final_mask: PlainFrame::zeros(self.width, self.height),
            history_t1: PlainFrame::zeros(self.width, self.height),
            history_t2: PlainFrame::zeros(self.width, self.height),
            scratch_a: PlainFrame::zeros(self.width, self.height),
            scratch_b: PlainFrame::zeros(self.width, self.height),
        }
    }

    /// Seed the banks from the first frame: slot 0 of every pixel takes
    /// its own blurred descriptor, then a forced full refresh scatters
    /// neighborhood samples over the remaining slots.
    fn seed_model<S: ImageStride<RGB8>>(&self, st: &mut RunningState, frame: &S) {
        self.ops
            .gaussian_blur_rgb8(frame, &mut st.blurred, self.cfg.blur_kernel_size as usize);
        for row in 0..self.height {
            for col in 0..self.width {
                if self.is_masked(row, col) {
                    continue;
                }
                let color = descriptor::extract(
                    &st.blurred,
                    row,
                    col,
                    self.cfg.neighborhood,
                    &mut st.code_buf,
                );
                let pix = (row * self.width + col) as usize;
                st.bank.store_last_observed(pix, color, &st.code_buf);
                st.bank.replace(pix, 0, color, &st.code_buf, 1);
            }
        }
        refresh::refresh_banks(
            &mut st.bank,
            self.width as usize,
            self.height as usize,
            None,
            1.0,
            true,
            self.cfg.refresh_window_halfwidth as i32,
            1,
            &mut st.rng,
            self.roi.as_ref(),
        );
        debug!("seeded background model");
    }

    fn run_frame<S: ImageStride<RGB8>>(&self, mut st: RunningState, frame: &S) -> RunningState {
        st.frame_index += 1;
        let now = st.frame_index;
        let cfg = &self.cfg;
        let width = self.width as usize;
        let height = self.height as usize;

        self.ops
            .gaussian_blur_rgb8(frame, &mut st.blurred, cfg.blur_kernel_size as usize);

        // classification sweep; per-pixel minimum distances are stashed
        // for the controller sweep, which needs the blink map first
        for row in 0..self.height {
            for col in 0..self.width {
                let pix = row as usize * width + col as usize;
                if self.is_masked(row, col) {
                    st.raw_mask.pixel_slice_mut(row, col)[0] = 0;
                    st.min_dist_buf[pix] = 0.0;
                    continue;
                }
                let color =
                    descriptor::extract(&st.blurred, row, col, cfg.neighborhood, &mut st.code_buf);
                st.bank.store_last_observed(pix, color, &st.code_buf);
                let r = st.feedback.r_at(pix);
                let verdict = classify::classify_pixel(
                    &mut st.bank,
                    pix,
                    color,
                    &st.code_buf,
                    r,
                    &st.match_params,
                    now,
                );
                st.raw_mask.pixel_slice_mut(row, col)[0] =
                    if verdict.is_background { 0 } else { 255 };
                st.min_dist_buf[pix] = verdict.min_dist;
            }
        }

        if cfg.neighbor_consensus_enabled {
            classify::consensus_pass(
                &mut st.raw_mask,
                &mut st.scratch_a,
                descriptor::offsets(cfg.neighborhood),
                cfg.neighbor_consensus_min,
                self.roi.as_ref(),
            );
        }

        // pixels whose raw label flipped since the previous frame
        st.blink_mask.assign(&st.raw_mask);
        st.blink_mask = maskops::mask_xor(st.blink_mask, &st.prev_raw_mask);

        // controller sweep over the settled raw labels
        for (r, (raw_row, blink_row, dist_row)) in izip!(
            st.raw_mask.rows(),
            st.blink_mask.rows(),
            st.min_dist_buf.chunks(width)
        )
        .enumerate()
        {
            for (c, (&raw_px, &blink_px, &dist)) in
                izip!(raw_row.iter(), blink_row.iter(), dist_row.iter()).enumerate()
            {
                if self.is_masked(r as u32, c as u32) {
                    continue;
                }
                st.feedback
                    .update(r * width + c, raw_px != 0, dist, blink_px != 0, &st.feedback_params);
            }
        }

        // post-processing: median, open, close, hole fill
        let morph = cfg.morph_kernel_size as usize;
        self.ops
            .median_binary(&st.raw_mask, &mut st.final_mask, cfg.median_filter_size as usize);
        self.ops.open(&st.final_mask, &mut st.scratch_a, morph);
        self.ops.close(&st.scratch_a, &mut st.final_mask, morph);
        self.ops.fill_holes(&st.final_mask, &mut st.scratch_a);

        // pixels blinking two frames running are flicker, not motion:
        // open their map and subtract it from the cleaned mask
        st.scratch_b.assign(&st.blink_mask);
        st.scratch_b = maskops::mask_and(st.scratch_b, &st.prev_blink_mask);
        self.ops.open(&st.scratch_b, &mut st.final_mask, morph);
        st.scratch_a = maskops::mask_diff(st.scratch_a, &st.final_mask);

        if let Some(roi) = &self.roi {
            st.scratch_a = maskops::mask_diff(st.scratch_a, roi);
        }
        std::mem::swap(&mut st.final_mask, &mut st.scratch_a);

        // final-label means for the controller
        for row in 0..self.height {
            for col in 0..self.width {
                if self.is_masked(row, col) {
                    continue;
                }
                let is_fg = st.final_mask.pixel_slice(row, col)[0] != 0;
                st.feedback.update_final(
                    row as usize * width + col as usize,
                    is_fg,
                    &st.feedback_params,
                );
            }
        }

        // model maintenance runs strictly after the classification and
        // controller sweeps
        let spread_offsets = if cfg.use_3x3_spread {
            descriptor::offsets(NeighborhoodPattern::Points8)
        } else {
            descriptor::offsets(NeighborhoodPattern::Points16)
        };
        refresh::stochastic_updates(
            &mut st.bank,
            width,
            height,
            &st.raw_mask,
            st.feedback.update_interval(),
            cfg.random_replace_enabled,
            cfg.neighbor_spread_enabled,
            spread_offsets,
            now,
            &mut st.rng,
            self.roi.as_ref(),
        );

        st.frames_since_refresh += 1;
        if cfg.refresh_interval > 0 && st.frames_since_refresh >= cfg.refresh_interval {
            refresh::refresh_banks(
                &mut st.bank,
                width,
                height,
                Some(&st.raw_mask),
                cfg.refresh_fraction,
                false,
                cfg.refresh_window_halfwidth as i32,
                now,
                &mut st.rng,
                self.roi.as_ref(),
            );
            st.frames_since_refresh = 0;
        }

        std::mem::swap(&mut st.history_t2, &mut st.history_t1);
        st.history_t1.assign(&st.final_mask);
        st.prev_raw_mask.assign(&st.raw_mask);
        st.prev_blink_mask.assign(&st.blink_mask);

        debug!(
            frame = st.frame_index,
            foreground = maskops::count_set(&st.final_mask),
            "processed frame"
        );
        st
    }
}

fn _test_subtractor_is_send() {
    fn implements<T: Send>() {}
    implements::<LcdpBackgroundSubtractor>();
}
