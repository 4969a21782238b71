//! Registration of a child landmark onto a base landmark.
//!
//! The run is a fixed sequence of stages:
//!
//! 1. `Init`: corner homography from child pixels to base pixels.
//! 2. `DetectFeatures`: evenly distributed Förstner features on the child
//!    reflectance, away from the border and from missing elevation.
//! 3. `MatchFeatures`: homography-guided correlation against the base.
//! 4. `EstimateHomography`: RANSAC homography over the matches.
//! 5. `Lift3D`: inlier matches to world points on each surface.
//! 6. `AlignPointClouds`: RANSAC rigid alignment of the point pairs.
//! 7. `WriteBack`: the correction applied to a copy of the child, saved
//!    when an output path is set.
//!
//! Any stage error ends the run in `Failed`; nothing is written then.
//!
//! # Example
//!
//! ```ignore
//! use lmk_pipeline::registration::Registration;
//!
//! let mut reg = Registration::new(base, child, Parameters::default())
//!     .with_output("child_registered.lmk");
//! reg.run(&mut StdRng::seed_from_u64(7))?;
//! println!("{}", reg.state().to_json()?);
//! ```

mod state;
mod steps;

pub use state::*;
pub use steps::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lmk_core::Landmark;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Parameters;

/// A registration run over two in-memory landmarks.
#[derive(Debug, Clone)]
pub struct Registration {
    params: Parameters,
    base: Landmark,
    child: Landmark,
    output: Option<PathBuf>,
    diagnostics: Option<PathBuf>,
    state: RegistrationState,
    registered: Option<Landmark>,
}

impl Registration {
    /// Prepare a run; `params` are validated first.
    pub fn new(base: Landmark, child: Landmark, params: Parameters) -> Self {
        Self {
            params: params.validated(),
            base,
            child,
            output: None,
            diagnostics: None,
            state: RegistrationState::default(),
            registered: None,
        }
    }

    /// Save the registered child here on success.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Write overlay images into this directory.
    pub fn with_diagnostics(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics = Some(dir.into());
        self
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn base(&self) -> &Landmark {
        &self.base
    }

    pub fn child(&self) -> &Landmark {
        &self.child
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    pub fn stage(&self) -> RegistrationStage {
        self.state.stage
    }

    /// The corrected child, once `WriteBack` has run.
    pub fn registered(&self) -> Option<&Landmark> {
        self.registered.as_ref()
    }

    /// Run every remaining stage.
    pub fn run<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        while !self.state.stage.is_terminal() {
            let stage = self.state.stage;
            info!("registration stage: {stage:?}");
            let res = match stage {
                RegistrationStage::Init => step_init(self),
                RegistrationStage::DetectFeatures => step_detect_features(self),
                RegistrationStage::MatchFeatures => step_match_features(self),
                RegistrationStage::EstimateHomography => step_estimate_homography(self, rng),
                RegistrationStage::Lift3D => step_lift_3d(self),
                RegistrationStage::AlignPointClouds => step_align_point_clouds(self, rng),
                RegistrationStage::WriteBack => step_write_back(self),
                RegistrationStage::Done | RegistrationStage::Failed => Ok(()),
            };
            if let Err(err) = res {
                warn!("registration failed at {stage:?}: {err:#}");
                self.state.failure = Some(format!("{err:#}"));
                self.state.stage = RegistrationStage::Failed;
                return Err(err.context(format!("registration failed at {stage:?}")));
            }
            self.state.stage = stage.next();
        }
        Ok(())
    }
}

/// `<child>_registered.lmk` next to the child file.
pub fn registered_path(child: &Path) -> PathBuf {
    let stem = child
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    child.with_file_name(format!("{stem}_registered.lmk"))
}

/// Load two landmark files, register the child onto the base and save the
/// result to [`registered_path`]. The RNG is seeded from the parameters.
pub fn register_files(
    base: &Path,
    child: &Path,
    params: Parameters,
    diagnostics: Option<&Path>,
) -> Result<Registration> {
    let base_lmk =
        Landmark::load(base).with_context(|| format!("failed to load base landmark {}", base.display()))?;
    let child_lmk =
        Landmark::load(child).with_context(|| format!("failed to load child landmark {}", child.display()))?;

    let mut reg = Registration::new(base_lmk, child_lmk, params).with_output(registered_path(child));
    if let Some(dir) = diagnostics {
        reg = reg.with_diagnostics(dir);
    }
    let mut rng = StdRng::seed_from_u64(reg.params.registration.seed);
    reg.run(&mut rng)?;
    Ok(reg)
}
