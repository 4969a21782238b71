//! Homography estimation between two raster frames.
//!
//! The homography `H` maps source pixels to destination pixels:
//! `x' ~ H x`, scaled so that `H[2,2] == 1`.
//!
//! # Algorithm
//!
//! With `h33` fixed to one, each correspondence contributes two rows of an
//! 8-unknown linear system
//!
//! ```text
//! [x y 1 0 0 0 -x·x' -y·x'] h = x'
//! [0 0 0 x y 1 -x·y' -y·y'] h = y'
//! ```
//!
//! solved in the least-squares sense through an SVD of the stacked rows. The
//! centered variant shifts both point sets to their centroids first and
//! shifts the solution back afterwards.
//!
//! The RANSAC variant samples four correspondences per iteration, rejects
//! solutions whose first two rows differ in norm by more than a factor of
//! `1 / 0.3`, and refines the best consensus on its inliers.

use lmk_core::{
    ransac, transfer, Estimator, Landmark, LmkError, Mat3, Pt2, RansacOptions, Real, Result,
};
use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::math::{center_points_2d, translation_2d};

/// Minimum number of correspondences the RANSAC estimator accepts.
pub const HOMOGRAPHY_RANSAC_MIN_POINTS: usize = 5;
/// Lowest accepted ratio between the norms of the first two rows.
const ROW_NORM_RATIO: Real = 0.3;
/// Smallest accepted ratio between extreme singular values of the system.
const SINGULAR_RATIO: Real = 1e-12;

/// Entry points for homography estimation.
#[derive(Debug, Clone, Copy)]
pub struct HomographySolver;

/// Output of a robust homography fit.
#[derive(Debug, Clone)]
pub struct HomographyFit {
    pub h: Mat3,
    pub inliers: Vec<usize>,
}

/// Estimate `H` such that `dst ~ H src` from at least four correspondences.
pub fn direct_homography(src: &[Pt2], dst: &[Pt2]) -> Result<Mat3> {
    HomographySolver::direct(src, dst)
}

/// Like [`direct_homography`] but on centroid-shifted points.
pub fn centered_homography(src: &[Pt2], dst: &[Pt2]) -> Result<Mat3> {
    HomographySolver::centered(src, dst)
}

/// Robust homography over noisy correspondences.
pub fn homography_ransac<R: Rng + ?Sized>(
    src: &[Pt2],
    dst: &[Pt2],
    opts: &RansacOptions,
    rng: &mut R,
) -> Result<HomographyFit> {
    HomographySolver::ransac(src, dst, opts, rng)
}

fn check_pairs(src: &[Pt2], dst: &[Pt2], needed: usize) -> Result<()> {
    if src.len() != dst.len() {
        return Err(LmkError::InvalidParameter(format!(
            "{} source points but {} destination points",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < needed {
        return Err(LmkError::InsufficientData {
            needed,
            got: src.len(),
        });
    }
    Ok(())
}

/// Reject solutions that collapse one axis.
fn is_well_conditioned(h: &Mat3) -> bool {
    let px = h[(0, 0)].hypot(h[(0, 1)]);
    let py = h[(1, 0)].hypot(h[(1, 1)]);
    let (lo, hi) = if px < py { (px, py) } else { (py, px) };
    hi > 0.0 && lo / hi > ROW_NORM_RATIO
}

impl HomographySolver {
    /// Solve the 8-unknown system directly on the given coordinates.
    pub fn direct(src: &[Pt2], dst: &[Pt2]) -> Result<Mat3> {
        check_pairs(src, dst, 4)?;

        let n = src.len();
        let mut a = DMatrix::<Real>::zeros(2 * n, 8);
        let mut b = DVector::<Real>::zeros(2 * n);
        for (i, (p, q)) in src.iter().zip(dst).enumerate() {
            let (x, y, u, v) = (p.x, p.y, q.x, q.y);
            let (r0, r1) = (2 * i, 2 * i + 1);

            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -x * u;
            a[(r0, 7)] = -y * u;
            b[r0] = u;

            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -x * v;
            a[(r1, 7)] = -y * v;
            b[r1] = v;
        }

        let svd = a.svd(true, true);
        let s_max = svd.singular_values.max();
        let s_min = svd.singular_values.min();
        if !(s_max > 0.0) || s_min / s_max < SINGULAR_RATIO {
            return Err(LmkError::NumericalDegeneracy("singular homography system"));
        }
        let h = svd
            .solve(&b, 0.0)
            .map_err(|_| LmkError::NumericalDegeneracy("singular homography system"))?;
        if h.iter().any(|v| !v.is_finite()) {
            return Err(LmkError::NumericalDegeneracy("singular homography system"));
        }
        Ok(Mat3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
    }

    /// Solve on centroid-shifted points: `H = T_dst⁻¹ · Hc · T_src`.
    pub fn centered(src: &[Pt2], dst: &[Pt2]) -> Result<Mat3> {
        check_pairs(src, dst, 4)?;
        let (src_c, cs) = center_points_2d(src).ok_or(LmkError::InsufficientData {
            needed: 4,
            got: 0,
        })?;
        let (dst_c, cd) = center_points_2d(dst).ok_or(LmkError::InsufficientData {
            needed: 4,
            got: 0,
        })?;
        let hc = Self::direct(&src_c, &dst_c)?;
        let h = translation_2d(cd.x, cd.y) * hc * translation_2d(-cs.x, -cs.y);
        lmk_core::normalize_homography(&h)
            .ok_or(LmkError::NumericalDegeneracy("homography has zero scale"))
    }

    /// Robust estimate; `opts.thresh` is the reprojection tolerance in
    /// destination pixels.
    ///
    /// Fails with [`LmkError::InsufficientData`] below five points and with
    /// [`LmkError::ConsensusFailure`] when fewer than `opts.min_inliers`
    /// correspondences agree with the best model.
    pub fn ransac<R: Rng + ?Sized>(
        src: &[Pt2],
        dst: &[Pt2],
        opts: &RansacOptions,
        rng: &mut R,
    ) -> Result<HomographyFit> {
        check_pairs(src, dst, HOMOGRAPHY_RANSAC_MIN_POINTS)?;

        #[derive(Clone)]
        struct HomographyDatum {
            src: Pt2,
            dst: Pt2,
        }

        struct HomographyEst;

        fn split(data: &[HomographyDatum], idx: &[usize]) -> (Vec<Pt2>, Vec<Pt2>) {
            idx.iter().map(|&i| (data[i].src, data[i].dst)).unzip()
        }

        impl Estimator for HomographyEst {
            type Datum = HomographyDatum;
            type Model = Mat3;

            const MIN_SAMPLES: usize = 4;

            fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
                let (s, d) = split(data, sample_indices);
                HomographySolver::centered(&s, &d)
                    .ok()
                    .filter(is_well_conditioned)
            }

            fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
                (transfer(model, &datum.src) - datum.dst).norm()
            }

            fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
                let (s, d) = split(data, inliers);
                HomographySolver::centered(&s, &d).ok()
            }
        }

        let data: Vec<HomographyDatum> = src
            .iter()
            .zip(dst)
            .map(|(&src, &dst)| HomographyDatum { src, dst })
            .collect();

        let res = ransac::<HomographyEst, R>(&data, opts, rng);
        debug!(
            "homography ransac: {} of {} inliers (rms {:.3})",
            res.inliers.len(),
            data.len(),
            res.inlier_rms
        );
        match res.model {
            Some(h) if res.success => Ok(HomographyFit {
                h,
                inliers: res.inliers,
            }),
            _ => Err(LmkError::ConsensusFailure {
                inliers: res.inliers.len(),
                required: opts.min_inliers,
            }),
        }
    }
}

/// Homography from `child` pixels to `base` pixels induced by the child's
/// four corners at zero elevation.
pub fn landmark_homography(child: &Landmark, base: &Landmark) -> Result<Mat3> {
    let c = (child.num_cols() - 1) as Real;
    let r = (child.num_rows() - 1) as Real;
    let corners = [
        Pt2::new(0.0, 0.0),
        Pt2::new(c, 0.0),
        Pt2::new(0.0, r),
        Pt2::new(c, r),
    ];
    let projected: Vec<Pt2> = corners
        .iter()
        .map(|p| {
            let w = child.col_row_ele_to_world(p.x, p.y, 0.0);
            let q = base.world_to_col_row_ele(&w);
            Pt2::new(q.x, q.y)
        })
        .collect();
    HomographySolver::direct(&corners, &projected)
}
