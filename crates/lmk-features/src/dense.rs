//! Sliding-block dense matching.
//!
//! The child image is tiled into square blocks. Inside each block a regular
//! grid of points is matched against the base image; when enough matches
//! are found a local homography is fitted by RANSAC and only its
//! reprojection inliers contribute. Each inlier's displacement is splatted
//! into the output rasters with weight `exp(-distance)` over the square of
//! `influence_window` cells on every side; a weight raster accumulated alongside normalizes the
//! result. Cells that received no weight stay NaN, and components larger
//! than `max_delta` are cleared back to NaN.

use lmk_core::{try_resize, transfer, LmkError, Mat3, Pt2, Raster, RansacOptions, Real, Result, Vec3};
use lmk_linear::homography_ransac;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::matcher::{MaskedImage, MatchOptions, MatchScratch};

/// Dense displacement output, in the child frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResults {
    pub delta_x: Raster<f32>,
    pub delta_y: Raster<f32>,
    pub delta_z: Raster<f32>,
    pub correlation: Raster<f32>,
}

impl CorrelationResults {
    /// NaN-filled rasters of the given size.
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            delta_x: Raster::filled(cols, rows, f32::NAN),
            delta_y: Raster::filled(cols, rows, f32::NAN),
            delta_z: Raster::filled(cols, rows, f32::NAN),
            correlation: Raster::filled(cols, rows, f32::NAN),
        }
    }

    pub fn cols(&self) -> usize {
        self.delta_x.cols()
    }

    pub fn rows(&self) -> usize {
        self.delta_x.rows()
    }

    /// Number of cells with a displacement.
    pub fn num_valid(&self) -> usize {
        self.correlation.data().iter().filter(|v| !v.is_nan()).count()
    }
}

/// Sliding-block configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowOptions {
    /// Block side in pixels.
    pub block_size: usize,
    /// Spacing of sample points inside a block.
    pub step: usize,
    /// A block is used only when more points than this were matched.
    pub min_features: usize,
    /// Splat reach in cells on each side of an inlier.
    pub influence_window: usize,
    /// Residual below which a match agrees with its block homography.
    pub reprojection_threshold: Real,
    /// Components with a larger magnitude are cleared to NaN.
    pub max_delta: Real,
    /// RANSAC tolerance for the per-block homography.
    pub homography_tolerance: Real,
    pub homography_iterations: usize,
}

impl Default for SlidingWindowOptions {
    fn default() -> Self {
        Self {
            block_size: 200,
            step: 4,
            min_features: 40,
            influence_window: 7,
            reprojection_threshold: 7.0,
            max_delta: 20.0,
            homography_tolerance: 3.0,
            homography_iterations: 200,
        }
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenseStats {
    pub blocks: usize,
    pub blocks_used: usize,
    pub matched: usize,
    pub inliers: usize,
}

/// Dense matcher state: the point matcher scratch and the splat accumulators.
#[derive(Debug, Clone, Default)]
pub struct DenseMatcher {
    matcher: MatchScratch,
    points: Vec<Pt2>,
    sums: Vec<[Real; 4]>,
    weights: Vec<Real>,
}

impl DenseMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match `child` against `base` block by block.
    ///
    /// `h_init` maps child pixels to base pixels. `displacement(child, base)`
    /// turns an inlier correspondence into a 3D displacement (or `None` to
    /// drop it). Results are written into `out`, which must match the child
    /// size; cells without support are set to NaN.
    #[allow(clippy::too_many_arguments)]
    pub fn run<F, R>(
        &mut self,
        child: &MaskedImage<'_>,
        base: &MaskedImage<'_>,
        h_init: &Mat3,
        match_opts: &MatchOptions,
        opts: &SlidingWindowOptions,
        displacement: F,
        rng: &mut R,
        out: &mut CorrelationResults,
    ) -> Result<DenseStats>
    where
        F: Fn(&Pt2, &Pt2) -> Option<Vec3>,
        R: Rng + ?Sized,
    {
        let (cols, rows) = (child.cols(), child.rows());
        if out.cols() != cols || out.rows() != rows {
            return Err(LmkError::InvalidParameter(format!(
                "results are {}x{}, child image is {cols}x{rows}",
                out.cols(),
                out.rows()
            )));
        }
        if opts.block_size == 0 || opts.step == 0 {
            return Err(LmkError::InvalidParameter(format!(
                "block size {} and step {} must be positive",
                opts.block_size, opts.step
            )));
        }

        self.sums.clear();
        self.weights.clear();
        try_resize(&mut self.sums, cols * rows, [0.0; 4])?;
        try_resize(&mut self.weights, cols * rows, 0.0)?;

        let ransac_opts = RansacOptions {
            max_iters: opts.homography_iterations,
            thresh: opts.homography_tolerance,
            ..RansacOptions::default()
        };
        let mut stats = DenseStats::default();

        for row in (0..rows).step_by(opts.block_size) {
            for col in (0..cols).step_by(opts.block_size) {
                stats.blocks += 1;
                self.points.clear();
                for m in (row..=row + opts.block_size).step_by(opts.step) {
                    for n in (col..=col + opts.block_size).step_by(opts.step) {
                        if m < rows && n < cols {
                            self.points.push(Pt2::new(n as Real, m as Real));
                        }
                    }
                }

                let set = self
                    .matcher
                    .match_points(child, base, h_init, &self.points, match_opts)?;
                stats.matched += set.matched.len();
                if set.matched.len() <= opts.min_features {
                    continue;
                }

                let (src, dst): (Vec<Pt2>, Vec<Pt2>) = set.matched.iter().map(|m| (m.child, m.base)).unzip();
                let h = match homography_ransac(&src, &dst, &ransac_opts, rng) {
                    Ok(fit) => fit.h,
                    Err(err) => {
                        debug!("block ({col}, {row}) skipped: {err}");
                        continue;
                    }
                };
                stats.blocks_used += 1;

                for m in &set.matched {
                    if (transfer(&h, &m.child) - m.base).norm() >= opts.reprojection_threshold {
                        continue;
                    }
                    let Some(d) = displacement(&m.child, &m.base) else {
                        continue;
                    };
                    stats.inliers += 1;
                    self.splat(cols, rows, &m.child, [d.x, d.y, d.z, m.score], opts.influence_window);
                }
            }
        }

        self.normalize(out, opts.max_delta);
        debug!(
            "dense matching: {} of {} blocks used, {} matches, {} inliers, {} cells",
            stats.blocks_used,
            stats.blocks,
            stats.matched,
            stats.inliers,
            out.num_valid()
        );
        Ok(stats)
    }

    fn splat(&mut self, cols: usize, rows: usize, at: &Pt2, value: [Real; 4], reach: usize) {
        let half = reach as isize;
        let (cx, cy) = (at.x.trunc() as isize, at.y.trunc() as isize);
        for y in cy - half..=cy + half {
            for x in cx - half..=cx + half {
                if x < 0 || y < 0 || x >= cols as isize || y >= rows as isize {
                    continue;
                }
                let dist = (x as Real - at.x).hypot(y as Real - at.y);
                let w = (-dist).exp();
                let k = y as usize * cols + x as usize;
                for (s, v) in self.sums[k].iter_mut().zip(value) {
                    *s += w * v;
                }
                self.weights[k] += w;
            }
        }
    }

    fn normalize(&self, out: &mut CorrelationResults, max_delta: Real) {
        let clip = |v: Real| {
            if v.abs() > max_delta {
                f32::NAN
            } else {
                v as f32
            }
        };
        let rasters = [
            out.delta_x.data_mut(),
            out.delta_y.data_mut(),
            out.delta_z.data_mut(),
            out.correlation.data_mut(),
        ];
        let [dx, dy, dz, corr] = rasters;
        for (k, (s, &w)) in self.sums.iter().zip(&self.weights).enumerate() {
            if w == 0.0 {
                dx[k] = f32::NAN;
                dy[k] = f32::NAN;
                dz[k] = f32::NAN;
                corr[k] = f32::NAN;
                continue;
            }
            dx[k] = clip(s[0] / w);
            dy[k] = clip(s[1] / w);
            dz[k] = clip(s[2] / w);
            corr[k] = (s[3] / w) as f32;
        }
    }
}
