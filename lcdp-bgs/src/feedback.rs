//! Per-pixel feedback controller.
//!
//! Every pixel carries a distance threshold scale `R`, an update interval
//! `T` and a variation modulator `v`, driven by running means of the
//! segmentation noise.

use lcdp_bgs_types::LcdpSegCfg;

/// Initial value of the variation modulator.
pub(crate) const V_INIT: f32 = 10.0;

/// Frames at or below this pixel count get doubled T bounds.
pub(crate) const SMALL_FRAME_TOTAL_PIXELS: usize = 320 * 240;

#[derive(Debug, Clone)]
pub(crate) struct FeedbackParams {
    pub enabled: bool,
    pub t_lower: f32,
    pub t_upper: f32,
    pub t_incr: f32,
    pub t_decr: f32,
    pub v_incr: f32,
    pub v_decr: f32,
    pub v_floor: f32,
    pub r_var: f32,
    pub unstable_ratio_min: f32,
    pub unstable_rdist_min: f32,
    pub alpha_short: f32,
    pub alpha_long: f32,
}

impl FeedbackParams {
    /// Derive the controller parameters for a frame of `live_pixels`
    /// unmasked pixels. Small frames get their T bounds doubled so the
    /// stochastic updates keep a usable rate.
    pub fn from_cfg(cfg: &LcdpSegCfg, live_pixels: usize) -> Self {
        let scale = if live_pixels <= SMALL_FRAME_TOTAL_PIXELS {
            2.0
        } else {
            1.0
        };
        Self {
            enabled: cfg.feedback_enabled,
            t_lower: cfg.feedback_t_lower * scale,
            t_upper: cfg.feedback_t_upper * scale,
            t_incr: cfg.feedback_t_incr,
            t_decr: cfg.feedback_t_decr,
            v_incr: cfg.feedback_v_incr,
            v_decr: cfg.feedback_v_decr,
            v_floor: cfg.feedback_v_floor,
            r_var: cfg.feedback_r_var,
            unstable_ratio_min: cfg.unstable_reg_ratio_min,
            unstable_rdist_min: cfg.unstable_reg_rdist_min,
            alpha_short: 1.0 / cfg.dist_mean_window_short as f32,
            alpha_long: 1.0 / cfg.dist_mean_window_long as f32,
        }
    }
}

/// Per-pixel controller state, one entry per pixel in row-major order.
#[derive(Debug, Clone)]
pub struct FeedbackState {
    r: Vec<f32>,
    t: Vec<f32>,
    v: Vec<f32>,
    mean_min_dist_short: Vec<f32>,
    mean_min_dist_long: Vec<f32>,
    mean_raw_segm_short: Vec<f32>,
    mean_raw_segm_long: Vec<f32>,
    mean_final_segm_short: Vec<f32>,
    mean_final_segm_long: Vec<f32>,
    unstable: Vec<bool>,
}

impl FeedbackState {
    pub(crate) fn new(n_pixels: usize, p: &FeedbackParams) -> Self {
        Self {
            r: vec![1.0; n_pixels],
            t: vec![p.t_lower; n_pixels],
            v: vec![V_INIT; n_pixels],
            mean_min_dist_short: vec![0.0; n_pixels],
            mean_min_dist_long: vec![0.0; n_pixels],
            mean_raw_segm_short: vec![0.0; n_pixels],
            mean_raw_segm_long: vec![0.0; n_pixels],
            mean_final_segm_short: vec![0.0; n_pixels],
            mean_final_segm_long: vec![0.0; n_pixels],
            unstable: vec![false; n_pixels],
        }
    }

    /// Fold one raw classification result into the controller.
    ///
    /// Means are always kept current; `R`, `T` and `v` only move while
    /// feedback is enabled.
    pub(crate) fn update(
        &mut self,
        pix: usize,
        is_raw_fg: bool,
        min_dist: f32,
        blinking: bool,
        p: &FeedbackParams,
    ) {
        let raw = if is_raw_fg { 1.0 } else { 0.0 };
        let md_s = &mut self.mean_min_dist_short[pix];
        *md_s += p.alpha_short * (min_dist - *md_s);
        let md_l = &mut self.mean_min_dist_long[pix];
        *md_l += p.alpha_long * (min_dist - *md_l);
        let rs_s = &mut self.mean_raw_segm_short[pix];
        *rs_s += p.alpha_short * (raw - *rs_s);
        let rs_l = &mut self.mean_raw_segm_long[pix];
        *rs_l += p.alpha_long * (raw - *rs_l);

        self.unstable[pix] = self.mean_raw_segm_short[pix] > p.unstable_ratio_min
            || self.r[pix] > p.unstable_rdist_min;

        if !p.enabled {
            return;
        }

        let v = &mut self.v[pix];
        if blinking || self.unstable[pix] {
            *v += p.v_incr;
        } else {
            *v = (*v - p.v_decr).max(p.v_floor);
        }

        let dmin = self.mean_min_dist_long[pix];
        let r = &mut self.r[pix];
        let target = (1.0 + 2.0 * dmin) * (1.0 + 2.0 * dmin);
        if *r < target {
            *r += p.r_var * (*v - p.v_decr);
        } else {
            *r = (*r - p.r_var / *v).max(1.0);
        }

        let t = &mut self.t[pix];
        if is_raw_fg || self.unstable[pix] {
            *t += p.t_incr;
        } else {
            *t -= p.t_decr;
        }
        *t = t.clamp(p.t_lower, p.t_upper);
    }

    /// Fold one post-processed label into the final-mask means.
    pub(crate) fn update_final(&mut self, pix: usize, is_final_fg: bool, p: &FeedbackParams) {
        let label = if is_final_fg { 1.0 } else { 0.0 };
        let fs_s = &mut self.mean_final_segm_short[pix];
        *fs_s += p.alpha_short * (label - *fs_s);
        let fs_l = &mut self.mean_final_segm_long[pix];
        *fs_l += p.alpha_long * (label - *fs_l);
    }

    pub(crate) fn r_at(&self, pix: usize) -> f32 {
        self.r[pix]
    }

    /// Distance threshold scale R(x), row-major.
    pub fn distance_threshold(&self) -> &[f32] {
        &self.r
    }

    /// Update interval T(x), row-major.
    pub fn update_interval(&self) -> &[f32] {
        &self.t
    }

    /// Variation modulator v(x), row-major.
    pub fn variation_modulator(&self) -> &[f32] {
        &self.v
    }

    pub fn mean_min_dist_short(&self) -> &[f32] {
        &self.mean_min_dist_short
    }

    pub fn mean_min_dist_long(&self) -> &[f32] {
        &self.mean_min_dist_long
    }

    pub fn mean_raw_segm_short(&self) -> &[f32] {
        &self.mean_raw_segm_short
    }

    pub fn mean_raw_segm_long(&self) -> &[f32] {
        &self.mean_raw_segm_long
    }

    pub fn mean_final_segm_short(&self) -> &[f32] {
        &self.mean_final_segm_short
    }

    pub fn mean_final_segm_long(&self) -> &[f32] {
        &self.mean_final_segm_long
    }

    pub fn unstable(&self) -> &[bool] {
        &self.unstable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn params() -> FeedbackParams {
        FeedbackParams {
            enabled: true,
            t_lower: 2.0,
            t_upper: 256.0,
            t_incr: 0.5,
            t_decr: 0.1,
            v_incr: 1.0,
            v_decr: 0.1,
            v_floor: 0.1,
            r_var: 0.01,
            unstable_ratio_min: 0.1,
            unstable_rdist_min: 3.0,
            alpha_short: 1.0 / 25.0,
            alpha_long: 1.0 / 100.0,
        }
    }

    #[test]
    fn quiet_background_settles() {
        let p = params();
        let mut fb = FeedbackState::new(1, &p);
        for _ in 0..200 {
            fb.update(0, false, 0.0, false, &p);
            fb.update_final(0, false, &p);
        }
        // R decays onto its floor, T onto its lower bound, v onto its floor
        assert_relative_eq!(fb.r_at(0), 1.0);
        assert_relative_eq!(fb.update_interval()[0], p.t_lower);
        assert_relative_eq!(fb.variation_modulator()[0], p.v_floor, epsilon = 1e-5);
        assert_relative_eq!(fb.mean_raw_segm_short()[0], 0.0);
        assert!(!fb.unstable()[0]);
    }

    #[test]
    fn blinking_pixel_grows_v_and_r() {
        let p = params();
        let mut fb = FeedbackState::new(1, &p);
        for _ in 0..100 {
            fb.update(0, true, 0.8, true, &p);
        }
        assert!(fb.variation_modulator()[0] > 50.0);
        assert!(fb.r_at(0) > 1.5);
        assert!(fb.unstable()[0]);
    }

    #[test]
    fn persistent_foreground_slows_updates() {
        let p = params();
        let mut fb = FeedbackState::new(1, &p);
        for _ in 0..500 {
            fb.update(0, true, 0.6, false, &p);
        }
        assert!(fb.update_interval()[0] > 100.0);
    }

    #[test]
    fn disabled_feedback_freezes_dynamics_but_not_means() {
        let mut p = params();
        p.enabled = false;
        let mut fb = FeedbackState::new(1, &p);
        for _ in 0..50 {
            fb.update(0, true, 0.9, true, &p);
        }
        assert_relative_eq!(fb.r_at(0), 1.0);
        assert_relative_eq!(fb.update_interval()[0], p.t_lower);
        assert_relative_eq!(fb.variation_modulator()[0], V_INIT);
        assert!(fb.mean_raw_segm_short()[0] > 0.8);
        assert!(fb.mean_min_dist_long()[0] > 0.3);
    }

    #[test]
    fn dynamics_stay_clamped_under_random_input() {
        let p = params();
        let mut fb = FeedbackState::new(4, &p);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..2000 {
            for pix in 0..4 {
                let fg: bool = rng.random();
                let blink: bool = rng.random();
                let dist: f32 = rng.random();
                fb.update(pix, fg, dist, blink, &p);
                fb.update_final(pix, fg, &p);
            }
        }
        for pix in 0..4 {
            assert!(fb.r_at(pix) >= 1.0);
            let t = fb.update_interval()[pix];
            assert!(t >= p.t_lower && t <= p.t_upper);
            assert!(fb.variation_modulator()[pix] >= p.v_floor);
            let m = fb.mean_min_dist_short()[pix];
            assert!((0.0..=1.0).contains(&m));
        }
    }

    #[test]
    fn small_frames_double_t_bounds() {
        let cfg = lcdp_bgs_cfg::default_8_neighbors();
        let small = FeedbackParams::from_cfg(&cfg, 320 * 240);
        let large = FeedbackParams::from_cfg(&cfg, 320 * 240 + 1);
        assert_relative_eq!(small.t_lower, 2.0 * large.t_lower);
        assert_relative_eq!(small.t_upper, 2.0 * large.t_upper);
    }

    #[test]
    fn from_cfg_carries_instability_thresholds() {
        let mut cfg = lcdp_bgs_cfg::default_8_neighbors();
        cfg.unstable_reg_ratio_min = 0.25;
        cfg.unstable_reg_rdist_min = 4.5;
        let p = FeedbackParams::from_cfg(&cfg, 1000);
        assert_relative_eq!(p.unstable_ratio_min, 0.25);
        assert_relative_eq!(p.unstable_rdist_min, 4.5);
    }
}
