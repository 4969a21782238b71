//! Run parameters, loaded from JSON.
//!
//! Every section and field is optional in the file; missing values take
//! their defaults. [`Parameters::validated`] applies the usual corrections
//! (odd window sizes, a search window larger than the template) and logs
//! each one.

use std::path::Path;

use anyhow::{Context, Result};
use lmk_core::{RansacOptions, Real};
use lmk_features::{MatchOptions, NccNormalization, SlidingWindowOptions};
use lmk_linear::rigid_ransac_options;
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureMatchConfig {
    pub correlation_window_size: usize,
    pub search_window_size: usize,
    pub min_correlation: Real,
    pub normalization: NccNormalization,
}

impl Default for FeatureMatchConfig {
    fn default() -> Self {
        Self {
            correlation_window_size: 25,
            search_window_size: 36,
            min_correlation: 0.3,
            normalization: NccNormalization::Product,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForstnerConfig {
    pub window_size: usize,
    pub min_dist_feature: Real,
    pub num_features: usize,
}

impl Default for ForstnerConfig {
    fn default() -> Self {
        Self {
            window_size: 9,
            min_dist_feature: 5.0,
            num_features: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    pub block_size: usize,
    pub step_size: usize,
    /// Blocks with no more matches than this are skipped.
    pub min_n_features: usize,
    pub feature_influence_window: usize,
    pub reprojection_threshold: Real,
    /// Displacement components beyond this are treated as outliers.
    pub max_delta_map: Real,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            block_size: 200,
            step_size: 4,
            min_n_features: 40,
            feature_influence_window: 7,
            reprojection_threshold: 7.0,
            max_delta_map: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Margin excluded from feature detection on every side of the child.
    pub feature_border: usize,
    pub reprojection_threshold: Real,
    /// Residual tolerance of the rigid alignment, in world units.
    pub rigid_inlier_tolerance: Real,
    pub homography_iterations: usize,
    pub rigid_iterations: usize,
    pub seed: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            feature_border: 10,
            reprojection_threshold: 7.0,
            rigid_inlier_tolerance: 40.0,
            homography_iterations: 200,
            rigid_iterations: 30,
            seed: 1_234_567,
        }
    }
}

/// All run parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub feature_match: FeatureMatchConfig,
    pub forstner_feature_detector: ForstnerConfig,
    pub sliding_window: SlidingWindowConfig,
    pub registration: RegistrationConfig,
}

fn make_odd(name: &str, value: &mut usize) {
    if *value % 2 == 0 {
        warn!("{name} must be odd; using {}", *value + 1);
        *value += 1;
    }
}

impl Parameters {
    /// Read parameters from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read parameters {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse parameters {}", path.display()))
    }

    /// Copy with invalid combinations corrected.
    pub fn validated(mut self) -> Self {
        let fm = &mut self.feature_match;
        make_odd("correlation_window_size", &mut fm.correlation_window_size);
        make_odd("search_window_size", &mut fm.search_window_size);
        if fm.search_window_size <= fm.correlation_window_size {
            let mut search = fm.search_window_size;
            while search <= fm.correlation_window_size {
                search += 2;
            }
            warn!(
                "search_window_size {} must exceed correlation_window_size {}; using {search}",
                fm.search_window_size, fm.correlation_window_size
            );
            fm.search_window_size = search;
        }
        make_odd("window_size", &mut self.forstner_feature_detector.window_size);

        let sw = &mut self.sliding_window;
        make_odd("feature_influence_window", &mut sw.feature_influence_window);
        if sw.step_size < 1 {
            warn!("step_size must be at least 1; using 1");
            sw.step_size = 1;
        }
        if sw.block_size < 1 {
            warn!("block_size must be at least 1; using 200");
            sw.block_size = 200;
        }
        self
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            template_size: self.feature_match.correlation_window_size,
            search_size: self.feature_match.search_window_size,
            min_correlation: self.feature_match.min_correlation,
            normalization: self.feature_match.normalization,
            ..MatchOptions::default()
        }
    }

    pub fn sliding_window_options(&self) -> SlidingWindowOptions {
        let sw = &self.sliding_window;
        SlidingWindowOptions {
            block_size: sw.block_size,
            step: sw.step_size,
            min_features: sw.min_n_features,
            influence_window: sw.feature_influence_window,
            reprojection_threshold: sw.reprojection_threshold,
            max_delta: sw.max_delta_map,
            ..SlidingWindowOptions::default()
        }
    }

    pub fn homography_ransac_options(&self) -> RansacOptions {
        RansacOptions {
            max_iters: self.registration.homography_iterations,
            thresh: self.registration.reprojection_threshold,
            ..RansacOptions::default()
        }
    }

    pub fn rigid_ransac_options(&self) -> RansacOptions {
        RansacOptions {
            max_iters: self.registration.rigid_iterations,
            ..rigid_ransac_options(self.registration.rigid_inlier_tolerance)
        }
    }
}
