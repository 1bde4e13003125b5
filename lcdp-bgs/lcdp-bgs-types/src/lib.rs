//! Configuration types for LCDP background subtraction.
//!
//! This crate provides the types used to parameterize the per-pixel
//! word-bank segmenter: descriptor layout, matching thresholds, feedback
//! dynamics, post-processing kernels and the sample refresh policy.

use serde::{Deserialize, Serialize};

/// Neighborhood sampled when computing a local color difference pattern.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum NeighborhoodPattern {
    /// The 8 pixels of the 3x3 ring around the center.
    Points8,
    /// 16 pixels from the 5x5 ring around the center.
    Points16,
}

impl NeighborhoodPattern {
    /// Number of neighbors sampled.
    pub fn count(&self) -> usize {
        match self {
            NeighborhoodPattern::Points8 => 8,
            NeighborhoodPattern::Points16 => 16,
        }
    }

    /// Length of the difference code: 9 signed differences per neighbor.
    pub fn code_len(&self) -> usize {
        self.count() * 9
    }
}

/// How the color check and the texture check combine into a word match.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum MatchCombination {
    /// Both checks must pass.
    And,
    /// Either check suffices.
    Or,
}

/// Configuration parameters for the LCDP segmenter.
///
/// These parameterize every stage of per-frame processing: how descriptors
/// are computed, when a descriptor matches a stored word, how the per-pixel
/// feedback controller moves its thresholds, which post-processing is
/// applied to the raw label image, and how the word banks are refreshed.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LcdpSegCfg {
    /// Which neighbors contribute to the difference code.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub neighborhood: NeighborhoodPattern,
    /// Number of words stored per pixel.
    ///
    /// Valid range is 1 or more. Larger banks remember more background
    /// modes at the cost of memory and per-pixel match time.
    pub words_no: u32,
    /// Tolerance for one code position, as a fraction of the full intensity
    /// range.
    ///
    /// Two code values count as agreeing when their absolute difference is
    /// at most `color_diff_ratio * 255`. Valid range is 0.0 - 1.0.
    pub color_diff_ratio: f32,
    /// Switch whether the plain color check contributes to matching.
    pub rgb_check_enabled: bool,
    /// Largest per-channel absolute color difference that still passes the
    /// color check. Value range is 0-255.
    pub rgb_threshold: u8,
    /// Base fraction of code positions allowed to disagree in the texture
    /// check.
    ///
    /// The effective threshold is scaled by the pixel's distance threshold
    /// and capped at `lcdp_max_threshold`. Valid range is 0.0 - 1.0.
    pub lcdp_threshold: f32,
    /// Upper cap for the scaled texture threshold. Valid range is
    /// `lcdp_threshold` - 1.0.
    pub lcdp_max_threshold: f32,
    /// How the color and texture checks combine.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub match_combination: MatchCombination,
    /// Number of distinct matching words required to label a pixel
    /// background.
    ///
    /// Valid range is 1 - `words_no`. 1 gives a first-match policy.
    pub required_word_matches: u32,
    /// Switch whether the neighborhood consensus pass runs.
    pub neighbor_consensus_enabled: bool,
    /// Minimum number of background-labeled neighbors for a background
    /// label to survive the consensus pass.
    pub neighbor_consensus_min: u32,
    /// Switch whether the per-pixel feedback controller adjusts the
    /// learning rate, distance threshold and variation modulator. When
    /// false all three stay at their initial values but the running means
    /// are still maintained.
    pub feedback_enabled: bool,
    /// Lower clamp of the per-pixel learning rate T. Valid range is 1.0 or
    /// more.
    pub feedback_t_lower: f32,
    /// Upper clamp of the per-pixel learning rate T.
    pub feedback_t_upper: f32,
    /// Added to T when a pixel is foreground or unstable.
    pub feedback_t_incr: f32,
    /// Subtracted from T when a pixel is stable background.
    pub feedback_t_decr: f32,
    /// Added to the variation modulator v when a pixel is blinking or
    /// unstable.
    pub feedback_v_incr: f32,
    /// Subtracted from v otherwise.
    pub feedback_v_decr: f32,
    /// Lower clamp of the variation modulator v. Valid range is above 0.0.
    pub feedback_v_floor: f32,
    /// Step scale for the distance threshold R.
    pub feedback_r_var: f32,
    /// Short-window foreground fraction above which a pixel counts as
    /// unstable. Valid range is 0.0 - 1.0.
    pub unstable_reg_ratio_min: f32,
    /// Distance threshold R above which a pixel counts as unstable.
    pub unstable_reg_rdist_min: f32,
    /// Window length, in frames, of the short running means.
    ///
    /// Valid range is 1 or more.
    pub dist_mean_window_short: u32,
    /// Window length, in frames, of the long running means.
    ///
    /// Valid range is 1 or more.
    pub dist_mean_window_long: u32,
    /// Kernel size of the Gaussian blur applied to the input frame before
    /// descriptor extraction. Valid values are 3, 5 and 7.
    pub blur_kernel_size: u16,
    /// Kernel size of the morphological open and close applied to the raw
    /// label image. Must be odd.
    pub morph_kernel_size: u16,
    /// Kernel size of the binary median filter applied to the raw label
    /// image. Must be odd.
    pub median_filter_size: u16,
    /// Use the 3x3 ring for neighbor propagation. When false the wider
    /// 16-point ring is used.
    pub use_3x3_spread: bool,
    /// Switch whether background pixels stochastically replace one of
    /// their own words at rate 1/T.
    pub random_replace_enabled: bool,
    /// Switch whether background pixels stochastically push their current
    /// descriptor into a neighbor's bank at rate 1/T.
    pub neighbor_spread_enabled: bool,
    /// How often, in frames, to run a partial bank refresh. 0 disables the
    /// periodic refresh; the initialization refresh always runs.
    pub refresh_interval: u32,
    /// Fraction of each bank replaced by a periodic refresh. Valid range is
    /// above 0.0 up to 1.0.
    pub refresh_fraction: f32,
    /// Half-width, in pixels, of the window from which refresh samples are
    /// drawn. Valid range is 1 or more.
    pub refresh_window_halfwidth: u16,
    /// Seed of the random generator driving sample replacement. Identical
    /// seeds give identical runs on identical input.
    pub rng_seed: u64,
}

impl LcdpSegCfg {
    /// Check the parameters for internal consistency.
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.words_no == 0 {
            return Err("words_no must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.color_diff_ratio) {
            return Err("color_diff_ratio must be within 0.0 - 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.lcdp_threshold) {
            return Err("lcdp_threshold must be within 0.0 - 1.0".into());
        }
        if self.lcdp_max_threshold < self.lcdp_threshold || self.lcdp_max_threshold > 1.0 {
            return Err("lcdp_max_threshold must be within lcdp_threshold - 1.0".into());
        }
        if self.required_word_matches == 0 || self.required_word_matches > self.words_no {
            return Err("required_word_matches must be within 1 - words_no".into());
        }
        if self.neighbor_consensus_min as usize > self.neighborhood.count() {
            return Err("neighbor_consensus_min exceeds the neighborhood size".into());
        }
        if self.feedback_t_lower < 1.0 {
            return Err("feedback_t_lower must be at least 1.0".into());
        }
        if self.feedback_t_upper < self.feedback_t_lower {
            return Err("feedback_t_upper must be at least feedback_t_lower".into());
        }
        if self.feedback_t_incr < 0.0 || self.feedback_t_decr < 0.0 {
            return Err("feedback T steps must not be negative".into());
        }
        if self.feedback_v_incr < 0.0 || self.feedback_v_decr < 0.0 {
            return Err("feedback v steps must not be negative".into());
        }
        if self.feedback_v_floor <= 0.0 {
            return Err("feedback_v_floor must be above 0.0".into());
        }
        if self.feedback_r_var < 0.0 {
            return Err("feedback_r_var must not be negative".into());
        }
        if !(0.0..=1.0).contains(&self.unstable_reg_ratio_min) {
            return Err("unstable_reg_ratio_min must be within 0.0 - 1.0".into());
        }
        if self.dist_mean_window_short == 0 || self.dist_mean_window_long == 0 {
            return Err("running mean windows must be at least 1 frame".into());
        }
        if !matches!(self.blur_kernel_size, 3 | 5 | 7) {
            return Err("blur_kernel_size must be 3, 5 or 7".into());
        }
        if self.morph_kernel_size % 2 == 0 {
            return Err("morph_kernel_size must be odd".into());
        }
        if self.median_filter_size % 2 == 0 {
            return Err("median_filter_size must be odd".into());
        }
        if !(self.refresh_fraction > 0.0 && self.refresh_fraction <= 1.0) {
            return Err("refresh_fraction must be above 0.0 and at most 1.0".into());
        }
        if self.refresh_window_halfwidth == 0 {
            return Err("refresh_window_halfwidth must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_cfg() -> LcdpSegCfg {
        LcdpSegCfg {
            neighborhood: NeighborhoodPattern::Points8,
            words_no: 25,
            color_diff_ratio: 0.05,
            rgb_check_enabled: true,
            rgb_threshold: 30,
            lcdp_threshold: 0.3,
            lcdp_max_threshold: 0.45,
            match_combination: MatchCombination::Or,
            required_word_matches: 2,
            neighbor_consensus_enabled: false,
            neighbor_consensus_min: 2,
            feedback_enabled: true,
            feedback_t_lower: 2.0,
            feedback_t_upper: 256.0,
            feedback_t_incr: 0.5,
            feedback_t_decr: 0.1,
            feedback_v_incr: 1.0,
            feedback_v_decr: 0.1,
            feedback_v_floor: 0.1,
            feedback_r_var: 0.01,
            unstable_reg_ratio_min: 0.1,
            unstable_reg_rdist_min: 3.0,
            dist_mean_window_short: 25,
            dist_mean_window_long: 100,
            blur_kernel_size: 5,
            morph_kernel_size: 3,
            median_filter_size: 9,
            use_3x3_spread: true,
            random_replace_enabled: true,
            neighbor_spread_enabled: true,
            refresh_interval: 0,
            refresh_fraction: 0.25,
            refresh_window_halfwidth: 3,
            rng_seed: 0,
        }
    }

    #[test]
    fn yaml_round_trip() {
        let cfg = some_cfg();
        let buf = serde_yaml::to_string(&cfg).unwrap();
        let cfg2: LcdpSegCfg = serde_yaml::from_str(&buf).unwrap();
        assert_eq!(cfg, cfg2);
    }

    #[test]
    fn unknown_fields_rejected() {
        let cfg = some_cfg();
        let mut buf = serde_yaml::to_string(&cfg).unwrap();
        buf.push_str("bogus_knob: 1\n");
        assert!(serde_yaml::from_str::<LcdpSegCfg>(&buf).is_err());
    }

    #[test]
    fn validation_catches_bad_ranges() {
        assert!(some_cfg().validate().is_ok());

        let mut cfg = some_cfg();
        cfg.words_no = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = some_cfg();
        cfg.required_word_matches = 26;
        assert!(cfg.validate().is_err());

        let mut cfg = some_cfg();
        cfg.lcdp_max_threshold = 0.2;
        assert!(cfg.validate().is_err());

        let mut cfg = some_cfg();
        cfg.median_filter_size = 4;
        assert!(cfg.validate().is_err());

        let mut cfg = some_cfg();
        cfg.blur_kernel_size = 9;
        assert!(cfg.validate().is_err());

        let mut cfg = some_cfg();
        cfg.feedback_v_floor = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn code_len_follows_neighborhood() {
        assert_eq!(NeighborhoodPattern::Points8.code_len(), 72);
        assert_eq!(NeighborhoodPattern::Points16.code_len(), 144);
    }
}
