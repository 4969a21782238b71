//! Dense comparison of two landmarks or two images.
//!
//! Both entry points run the sliding-block matcher over a child/base pair
//! and differ in the initial homography and in how a correspondence turns
//! into a displacement:
//!
//! - landmarks: corner homography; the displacement is the base surface
//!   point minus the child surface point, in the child map frame (x east,
//!   y north, z up);
//! - images: caller-supplied homography; the displacement is the pixel
//!   offset `(base - child, 0)`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lmk_core::{Landmark, Mat3, Pt2, RasterView, Raster, Vec3};
use lmk_features::{CorrelationResults, DenseMatcher, DenseStats, MaskedImage};
use lmk_linear::landmark_homography;
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Parameters;

/// No-data caps for the two sides of a comparison; negative is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoDataCaps {
    pub child: i64,
    pub base: i64,
}

impl Default for NoDataCaps {
    fn default() -> Self {
        Self { child: -1, base: 0 }
    }
}

/// Output of a comparison.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub results: CorrelationResults,
    pub stats: DenseStats,
}

/// Dense 3D displacement of `base` relative to `child`, on the child grid.
pub fn compare_landmarks<R: Rng + ?Sized>(
    child: &Landmark,
    base: &Landmark,
    params: &Parameters,
    caps: NoDataCaps,
    rng: &mut R,
) -> Result<Comparison> {
    let params = params.clone().validated();
    let h = landmark_homography(child, base).context("failed to compute corner homography")?;

    let child_mask = child.no_data_mask();
    let base_mask = base.no_data_mask();
    let child_img = MaskedImage::new(
        child.srm_view(),
        Some(RasterView::new(&child_mask, child.num_cols(), child.num_rows())?),
    )?;
    let base_img = MaskedImage::new(
        base.srm_view(),
        Some(RasterView::new(&base_mask, base.num_cols(), base.num_rows())?),
    )?;

    let mut match_opts = params.match_options();
    match_opts.max_template_no_data = caps.child;
    match_opts.max_search_no_data = caps.base;

    let to_map = *child.world_to_map();
    let displacement = |c: &Pt2, b: &Pt2| -> Option<Vec3> {
        let pc = child.col_row_to_world(c.x, c.y)?;
        let pb = base.col_row_to_world(b.x, b.y)?;
        Some(to_map * (pb - pc))
    };

    let mut results = CorrelationResults::new(child.num_cols(), child.num_rows());
    let stats = DenseMatcher::new().run(
        &child_img,
        &base_img,
        &h,
        &match_opts,
        &params.sliding_window_options(),
        displacement,
        rng,
        &mut results,
    )?;
    info!(
        "landmark comparison: {} inliers, {} cells with displacement",
        stats.inliers,
        results.num_valid()
    );
    Ok(Comparison { results, stats })
}

/// Dense pixel displacement of `base` relative to `child`. `h_init` maps
/// child pixels to base pixels.
pub fn compare_images<R: Rng + ?Sized>(
    child: &MaskedImage<'_>,
    base: &MaskedImage<'_>,
    h_init: &Mat3,
    params: &Parameters,
    caps: NoDataCaps,
    rng: &mut R,
) -> Result<Comparison> {
    let params = params.clone().validated();
    let mut match_opts = params.match_options();
    match_opts.max_template_no_data = caps.child;
    match_opts.max_search_no_data = caps.base;

    let mut results = CorrelationResults::new(child.cols(), child.rows());
    let stats = DenseMatcher::new().run(
        child,
        base,
        h_init,
        &match_opts,
        &params.sliding_window_options(),
        |c: &Pt2, b: &Pt2| Some(Vec3::new(b.x - c.x, b.y - c.y, 0.0)),
        rng,
        &mut results,
    )?;
    info!(
        "image comparison: {} inliers, {} cells with displacement",
        stats.inliers,
        results.num_valid()
    );
    Ok(Comparison { results, stats })
}

fn write_raw(path: &Path, raster: &Raster<f32>) -> Result<()> {
    let bytes: Vec<u8> = raster.data().iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

/// Write the four result rasters as little-endian `f32` files named
/// `<prefix>_<name>_<cols>by<rows>.raw`.
pub fn write_results(prefix: &Path, results: &CorrelationResults) -> Result<Vec<PathBuf>> {
    let stem = prefix.to_string_lossy();
    let (cols, rows) = (results.cols(), results.rows());
    let layers = [
        ("delta_x", &results.delta_x),
        ("delta_y", &results.delta_y),
        ("delta_z", &results.delta_z),
        ("correlation", &results.correlation),
    ];
    let mut written = Vec::with_capacity(layers.len());
    for (name, raster) in layers {
        let path = PathBuf::from(format!("{stem}_{name}_{cols}by{rows}.raw"));
        write_raw(&path, raster)?;
        written.push(path);
    }
    Ok(written)
}
