//! Ready-made configurations for the LCDP segmenter.

use lcdp_bgs_types::{LcdpSegCfg, MatchCombination, NeighborhoodPattern};

fn my_default(neighborhood: NeighborhoodPattern) -> LcdpSegCfg {
    LcdpSegCfg {
        neighborhood,
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

/// Default profile with the 3x3 neighborhood.
pub fn default_8_neighbors() -> LcdpSegCfg {
    my_default(NeighborhoodPattern::Points8)
}

/// Default profile with the 16-point neighborhood. Slower but more
/// discriminative on textured scenes.
pub fn default_16_neighbors() -> LcdpSegCfg {
    my_default(NeighborhoodPattern::Points16)
}

/// Profile for reproducible tests: no pre-blur beyond the minimum kernel,
/// no post-processing bigger than its kernel floor, stochastic updates off.
pub fn deterministic_test_profile() -> LcdpSegCfg {
    LcdpSegCfg {
        blur_kernel_size: 3,
        morph_kernel_size: 1,
        median_filter_size: 1,
        random_replace_enabled: false,
        neighbor_spread_enabled: false,
        ..my_default(NeighborhoodPattern::Points8)
    }
}
