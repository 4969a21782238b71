//! Intermediate results of a registration run.

use lmk_core::{Iso3, Mat3, Pt2, Real, Vec3};
use lmk_features::FeatureMatch;
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    #[default]
    Init,
    DetectFeatures,
    MatchFeatures,
    EstimateHomography,
    #[serde(rename = "lift_3d")]
    Lift3D,
    AlignPointClouds,
    WriteBack,
    Done,
    Failed,
}

impl RegistrationStage {
    /// Stage that follows a successful run of `self`.
    pub fn next(self) -> Self {
        use RegistrationStage::*;
        match self {
            Init => DetectFeatures,
            DetectFeatures => MatchFeatures,
            MatchFeatures => EstimateHomography,
            EstimateHomography => Lift3D,
            Lift3D => AlignPointClouds,
            AlignPointClouds => WriteBack,
            WriteBack | Done => Done,
            Failed => Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A correspondence between child and base pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub child: Pt2,
    pub base: Pt2,
    pub score: Real,
}

impl From<&FeatureMatch> for MatchPair {
    fn from(m: &FeatureMatch) -> Self {
        Self {
            child: m.child,
            base: m.base,
            score: m.score,
        }
    }
}

/// A correspondence between child and base surface points, in world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPair {
    pub child: Vec3,
    pub base: Vec3,
}

/// One entry of the stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: RegistrationStage,
    pub message: String,
}

/// Intermediate state of a registration run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationState {
    pub stage: RegistrationStage,

    // ─────────────────────────────────────────────────────────────────────────
    // Image-space results
    // ─────────────────────────────────────────────────────────────────────────
    /// Corner homography, child pixels to base pixels.
    pub initial_homography: Option<Mat3>,

    /// Selected child features (pixels).
    pub features: Option<Vec<Pt2>>,

    /// Matches above the minimum correlation.
    pub matches: Option<Vec<MatchPair>>,

    /// Matches below the minimum correlation, kept for diagnostics.
    pub weak_matches: Vec<MatchPair>,

    /// RANSAC homography over the matches.
    pub refined_homography: Option<Mat3>,

    /// Indices into `matches` agreeing with the refined homography.
    pub homography_inliers: Option<Vec<usize>>,

    // ─────────────────────────────────────────────────────────────────────────
    // World-space results
    // ─────────────────────────────────────────────────────────────────────────
    pub point_pairs: Option<Vec<PointPair>>,

    /// Correction mapping child world points onto the base.
    pub rigid_transform: Option<Iso3>,

    pub rigid_inliers: Option<usize>,

    pub log: Vec<StageRecord>,
    pub failure: Option<String>,
}

impl RegistrationState {
    pub fn has_matches(&self) -> bool {
        self.matches.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn has_homography(&self) -> bool {
        self.refined_homography.is_some() && self.homography_inliers.is_some()
    }

    pub fn has_rigid(&self) -> bool {
        self.rigid_transform.is_some()
    }

    /// Matches that agree with the refined homography.
    pub fn inlier_matches(&self) -> Vec<MatchPair> {
        match (&self.matches, &self.homography_inliers) {
            (Some(m), Some(idx)) => idx.iter().filter_map(|&i| m.get(i).copied()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn record(&mut self, message: impl Into<String>) {
        self.log.push(StageRecord {
            stage: self.stage,
            message: message.into(),
        });
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_empty() {
        let state = RegistrationState::default();
        assert_eq!(state.stage, RegistrationStage::Init);
        assert!(!state.has_matches());
        assert!(!state.has_homography());
        assert!(!state.has_rigid());
        assert!(state.inlier_matches().is_empty());
    }

    #[test]
    fn stages_advance_in_order() {
        let mut stage = RegistrationStage::Init;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.last(), Some(&RegistrationStage::Done));
        assert_eq!(RegistrationStage::Failed.next(), RegistrationStage::Failed);
    }

    #[test]
    fn inlier_matches_follow_indices() {
        let pair = |x: Real| MatchPair {
            child: Pt2::new(x, 0.0),
            base: Pt2::new(x, 1.0),
            score: 0.9,
        };
        let state = RegistrationState {
            matches: Some(vec![pair(0.0), pair(1.0), pair(2.0)]),
            homography_inliers: Some(vec![0, 2]),
            refined_homography: Some(Mat3::identity()),
            ..Default::default()
        };
        let inl = state.inlier_matches();
        assert_eq!(inl.len(), 2);
        assert_eq!(inl[1].child.x, 2.0);
    }

    #[test]
    fn json_roundtrip() {
        let mut state = RegistrationState {
            initial_homography: Some(Mat3::identity()),
            features: Some(vec![Pt2::new(3.0, 4.0)]),
            rigid_transform: Some(Iso3::identity()),
            ..Default::default()
        };
        state.record("started");
        let json = state.to_json().unwrap();
        let back: RegistrationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.features, state.features);
        assert_eq!(back.log, state.log);
        assert_eq!(back.rigid_transform, state.rigid_transform);
        assert!(json.contains("\"init\""));
    }

    #[test]
    fn clear_resets() {
        let mut state = RegistrationState {
            rigid_inliers: Some(12),
            ..Default::default()
        };
        state.clear();
        assert!(state.rigid_inliers.is_none());
    }
}
