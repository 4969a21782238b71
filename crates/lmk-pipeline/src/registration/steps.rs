//! Stage functions of the registration run.
//!
//! Each step reads the results of the previous ones from the run state,
//! fails with context when they are missing, and stores its own results.

use anyhow::{ensure, Context, Result};
use lmk_core::{Pt2, Real, Vec3, Window};
use lmk_features::{EvenDistribution, ForstnerScratch, MaskedImage, MatchScratch};
use lmk_linear::{homography_ransac, landmark_homography, RigidSolver};
use log::{debug, info, warn};
use rand::Rng;

use super::state::{MatchPair, PointPair};
use super::Registration;
use crate::diagnostics;

/// Corner homography from child pixels to base pixels.
pub fn step_init(reg: &mut Registration) -> Result<()> {
    ensure!(
        reg.child.planet() == reg.base.planet(),
        "child is on {} but base is on {}",
        reg.child.planet(),
        reg.base.planet()
    );
    let h = landmark_homography(&reg.child, &reg.base).context("failed to compute corner homography")?;
    reg.state.initial_homography = Some(h);
    reg.state.record("corner homography computed");
    Ok(())
}

/// Evenly distributed interest points inside the child border.
pub fn step_detect_features(reg: &mut Registration) -> Result<()> {
    let border = reg.params.registration.feature_border;
    let child = &reg.child;
    let (cols, rows) = (child.num_cols(), child.num_rows());
    ensure!(
        cols > 2 * border && rows > 2 * border,
        "child landmark {cols}x{rows} is too small for a {border}-pixel border"
    );
    let region = Window::new(border, border, cols - 2 * border, rows - 2 * border);

    let fd = &reg.params.forstner_feature_detector;
    let selector = EvenDistribution {
        window: fd.window_size,
        min_dist: fd.min_dist_feature,
        max_features: fd.num_features,
    };
    let mut scratch = ForstnerScratch::new();
    scratch.reserve(cols)?;
    let selected = selector.select(&mut scratch, &child.srm_view(), &region)?;

    let ele = child.ele_view();
    let features: Vec<Pt2> = selected
        .iter()
        .filter(|f| !ele.at(f.col, f.row).is_nan())
        .map(|f| Pt2::new(f.col as Real, f.row as Real))
        .collect();
    debug!(
        "{} features selected, {} with elevation",
        selected.len(),
        features.len()
    );
    ensure!(!features.is_empty(), "no usable features in child landmark");

    reg.state.record(format!("{} features", features.len()));
    reg.state.features = Some(features);
    Ok(())
}

/// Correlate every feature against the base reflectance.
pub fn step_match_features(reg: &mut Registration) -> Result<()> {
    let h = reg
        .state
        .initial_homography
        .context("initial homography not computed")?;
    let set = {
        let features = reg.state.features.as_ref().context("features not detected")?;
        let child = MaskedImage::unmasked(reg.child.srm_view());
        let base = MaskedImage::unmasked(reg.base.srm_view());
        MatchScratch::new().match_points(&child, &base, &h, features, &reg.params.match_options())?
    };
    info!(
        "{} matches, {} below correlation {}",
        set.matched.len(),
        set.weak.len(),
        reg.params.feature_match.min_correlation
    );
    ensure!(
        !set.matched.is_empty(),
        "no feature correlated above {}",
        reg.params.feature_match.min_correlation
    );

    reg.state.matches = Some(set.matched.iter().map(MatchPair::from).collect());
    reg.state.weak_matches = set.weak.iter().map(MatchPair::from).collect();
    reg.state.record(format!("{} matches", set.matched.len()));

    if let Some(dir) = &reg.diagnostics {
        let matched: Vec<Pt2> = set.matched.iter().map(|m| m.child).collect();
        let weak: Vec<Pt2> = set.weak.iter().map(|m| m.child).collect();
        if let Err(err) = diagnostics::write_feature_overlay(
            &dir.join("matched_features.png"),
            &reg.child.srm_view(),
            &matched,
            &weak,
        ) {
            warn!("skipping match overlay: {err:#}");
        }
    }
    Ok(())
}

/// Robust homography over all matches.
pub fn step_estimate_homography<R: Rng + ?Sized>(reg: &mut Registration, rng: &mut R) -> Result<()> {
    let matches = reg.state.matches.as_ref().context("features not matched")?;
    let (src, dst): (Vec<Pt2>, Vec<Pt2>) = matches.iter().map(|m| (m.child, m.base)).unzip();
    let fit = homography_ransac(&src, &dst, &reg.params.homography_ransac_options(), rng)
        .context("no homography agrees with the matches")?;
    ensure!(!fit.inliers.is_empty(), "no match within the reprojection threshold");
    info!("homography: {} of {} matches are inliers", fit.inliers.len(), matches.len());

    reg.state.record(format!("{} homography inliers", fit.inliers.len()));
    reg.state.refined_homography = Some(fit.h);
    reg.state.homography_inliers = Some(fit.inliers);

    if let Some(dir) = &reg.diagnostics {
        let inliers: Vec<Pt2> = reg.state.inlier_matches().iter().map(|m| m.child).collect();
        let overlay = diagnostics::write_feature_overlay(
            &dir.join("homography_inliers.png"),
            &reg.child.srm_view(),
            &inliers,
            &[],
        );
        let warped = diagnostics::write_warped(
            &dir.join("base_warped_to_child.png"),
            &reg.base.srm_view(),
            &fit.h,
            reg.child.num_cols(),
            reg.child.num_rows(),
        );
        for err in [overlay.err(), warped.err()].into_iter().flatten() {
            warn!("skipping diagnostics image: {err:#}");
        }
    }
    Ok(())
}

/// Inlier matches to world points on each landmark's own surface.
pub fn step_lift_3d(reg: &mut Registration) -> Result<()> {
    ensure!(reg.state.has_homography(), "homography not estimated");
    let inliers = reg.state.inlier_matches();
    let pairs: Vec<PointPair> = inliers
        .iter()
        .filter_map(|m| {
            let child = reg.child.col_row_to_world(m.child.x, m.child.y)?;
            let base = reg.base.col_row_to_world(m.base.x, m.base.y)?;
            Some(PointPair { child, base })
        })
        .collect();
    debug!("{} of {} inliers lifted to 3D", pairs.len(), inliers.len());
    ensure!(!pairs.is_empty(), "no inlier has elevation on both landmarks");

    reg.state.record(format!("{} point pairs", pairs.len()));
    reg.state.point_pairs = Some(pairs);
    Ok(())
}

/// Robust rigid transform taking child points onto base points.
pub fn step_align_point_clouds<R: Rng + ?Sized>(reg: &mut Registration, rng: &mut R) -> Result<()> {
    let pairs = reg.state.point_pairs.as_ref().context("matches not lifted to 3D")?;
    let (a, b): (Vec<Vec3>, Vec<Vec3>) = pairs.iter().map(|p| (p.child, p.base)).unzip();
    let fit = RigidSolver::ransac(&a, &b, &reg.params.rigid_ransac_options(), rng)
        .context("rigid alignment did not reach consensus")?;
    info!(
        "rigid alignment: {} of {} pairs, translation {:.3?}",
        fit.inliers.len(),
        pairs.len(),
        fit.transform.translation.vector.as_slice()
    );

    reg.state.record(format!("{} rigid inliers", fit.inliers.len()));
    reg.state.rigid_inliers = Some(fit.inliers.len());
    reg.state.rigid_transform = Some(fit.transform);
    Ok(())
}

/// Apply the correction to a copy of the child and save it.
pub fn step_write_back(reg: &mut Registration) -> Result<()> {
    let t = reg.state.rigid_transform.context("rigid transform not estimated")?;
    let rotation = t.rotation.to_rotation_matrix().into_inner();
    let mut registered = reg.child.clone();
    registered.apply_rigid(&rotation, &t.translation.vector)?;

    if let Some(path) = &reg.output {
        registered
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("registered landmark written to {}", path.display());
        reg.state.record(format!("wrote {}", path.display()));
    }
    reg.registered = Some(registered);
    Ok(())
}
