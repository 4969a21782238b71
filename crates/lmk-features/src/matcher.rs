//! Feature matching between two byte rasters with optional no-data masks.
//!
//! Each child point is projected into the base frame through an initial
//! homography. A template is resampled from the child image on the integer
//! base grid around the rounded projection, so the correlation compares like
//! with like even under rotation or scale. The best NCC placement inside a
//! search window around the same center, corrected by the rounding residual,
//! is the match.

use lmk_core::{
    invert_homography, sample, transfer, LmkError, Mat3, Pt2, RasterView, Real, Result, Vec2, Window,
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::correlation::{CorrelationScratch, NccNormalization, SearchWindow};

/// Matcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Template side in pixels (odd).
    pub template_size: usize,
    /// Search window side in pixels (odd, larger than the template).
    pub search_size: usize,
    /// A match is accepted when its score is strictly above this.
    pub min_correlation: Real,
    pub normalization: NccNormalization,
    /// Most no-data template cells tolerated; negative means unlimited.
    pub max_template_no_data: i64,
    /// Most masked search cells tolerated; negative means unlimited.
    pub max_search_no_data: i64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            template_size: 25,
            search_size: 37,
            min_correlation: 0.3,
            normalization: NccNormalization::Product,
            max_template_no_data: 0,
            max_search_no_data: -1,
        }
    }
}

impl MatchOptions {
    fn check(&self) -> Result<()> {
        if self.template_size % 2 == 0 || self.search_size % 2 == 0 {
            return Err(LmkError::InvalidParameter(format!(
                "window sizes must be odd (template {}, search {})",
                self.template_size, self.search_size
            )));
        }
        if self.search_size < self.template_size {
            return Err(LmkError::InvalidParameter(format!(
                "search window {} smaller than template {}",
                self.search_size, self.template_size
            )));
        }
        Ok(())
    }
}

/// A byte raster with an optional no-data mask (non-zero = no data).
#[derive(Debug, Clone, Copy)]
pub struct MaskedImage<'a> {
    pub image: RasterView<'a, u8>,
    pub mask: Option<RasterView<'a, u8>>,
}

impl<'a> MaskedImage<'a> {
    pub fn new(image: RasterView<'a, u8>, mask: Option<RasterView<'a, u8>>) -> Result<Self> {
        if let Some(m) = &mask {
            if !m.same_shape(&image) {
                return Err(LmkError::InvalidParameter(format!(
                    "mask is {}x{}, image is {}x{}",
                    m.cols(),
                    m.rows(),
                    image.cols(),
                    image.rows()
                )));
            }
        }
        Ok(Self { image, mask })
    }

    pub fn unmasked(image: RasterView<'a, u8>) -> Self {
        Self { image, mask: None }
    }

    pub fn cols(&self) -> usize {
        self.image.cols()
    }

    pub fn rows(&self) -> usize {
        self.image.rows()
    }
}

/// A correspondence between a child point and its base match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub child: Pt2,
    pub base: Pt2,
    pub score: Real,
    /// Peak covariance `[c_cc, c_cr, c_rr]` from the subpixel fit.
    pub covariance: [Real; 3],
}

impl FeatureMatch {
    pub fn displacement(&self) -> Vec2 {
        self.base - self.child
    }
}

/// Outcome of matching a list of points.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    /// Matches scoring above the minimum correlation.
    pub matched: Vec<FeatureMatch>,
    /// Points that correlated but scored too low, with their best score.
    pub weak: Vec<FeatureMatch>,
    /// Points skipped for boundary, no-data or numeric reasons.
    pub skipped: usize,
}

/// Reusable buffers for the matcher.
#[derive(Debug, Clone, Default)]
pub struct MatchScratch {
    correlation: CorrelationScratch,
    template: Vec<u8>,
}

impl MatchScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for the window sizes in `opts`.
    pub fn reserve(&mut self, opts: &MatchOptions) -> Result<()> {
        let t = opts.template_size * opts.template_size;
        if t > self.template.capacity() {
            self.template
                .try_reserve(t - self.template.len())
                .map_err(|_| LmkError::AllocationFailure(t))?;
        }
        let placements = (opts.search_size + 1).saturating_sub(opts.template_size).pow(2);
        self.correlation.reserve(opts.search_size, placements)
    }

    /// Match one child point.
    ///
    /// `h` maps child pixels to base pixels and `h_inv` is its inverse.
    /// Returns `Ok(None)` when a no-data cap rejects the point and the
    /// correlation result (regardless of score) otherwise.
    pub fn match_point(
        &mut self,
        child: &MaskedImage<'_>,
        base: &MaskedImage<'_>,
        h: &Mat3,
        h_inv: &Mat3,
        point: &Pt2,
        opts: &MatchOptions,
    ) -> Result<Option<FeatureMatch>> {
        let half_t = (opts.template_size / 2) as Real;
        let half_s = opts.search_size / 2;
        let projected = transfer(h, point);
        let (cols2, rows2) = (base.cols() as Real, base.rows() as Real);
        let inside = projected.x > half_t
            && projected.x < cols2 - half_t
            && projected.y > half_t
            && projected.y < rows2 - half_t;
        if !inside {
            return Err(LmkError::BoundaryViolation {
                x: projected.x,
                y: projected.y,
            });
        }

        let ix = (projected.x + 0.5).trunc();
        let iy = (projected.y + 0.5).trunc();
        let (dx, dy) = (projected.x - ix, projected.y - iy);

        let n = opts.template_size;
        self.template.clear();
        if n * n > self.template.capacity() {
            self.template
                .try_reserve(n * n)
                .map_err(|_| LmkError::AllocationFailure(n * n))?;
        }
        let mut no_data = 0i64;
        let half = (n / 2) as isize;
        for m in -half..=half {
            for k in -half..=half {
                let cell = transfer(h_inv, &Pt2::new(ix + k as Real, iy + m as Real));
                let value = match sample(&child.image, cell.x, cell.y) {
                    Some(v) => {
                        let masked = child.mask.as_ref().map_or(false, |mask| {
                            sample(mask, cell.x, cell.y).map_or(true, |m| m > 0)
                        });
                        if masked {
                            no_data += 1;
                        }
                        v
                    }
                    None => {
                        no_data += 1;
                        0
                    }
                };
                self.template.push(value);
            }
        }
        if opts.max_template_no_data >= 0 && no_data > opts.max_template_no_data {
            return Ok(None);
        }

        // search is centred on the rounded projection, then clipped to the image
        let (ix, iy) = (ix as usize, iy as usize);
        let left = ix.saturating_sub(half_s);
        let top = iy.saturating_sub(half_s);
        let window = Window::new(
            left,
            top,
            opts.search_size.min(base.cols() - left),
            opts.search_size.min(base.rows() - top),
        );
        if let Some(mask) = &base.mask {
            if opts.max_search_no_data >= 0 && mask.count_set(&window) as i64 > opts.max_search_no_data {
                return Ok(None);
            }
        }

        let template = RasterView::new(&self.template, n, n)?;
        let search = SearchWindow {
            left: window.left as isize,
            top: window.top as isize,
            width: window.width,
            height: window.height,
        };
        let peak = self
            .correlation
            .correlate(&template, &base.image, &search, opts.normalization, true)?;
        Ok(Some(FeatureMatch {
            child: *point,
            base: Pt2::new(peak.col + dx, peak.row + dy),
            score: peak.score,
            covariance: peak.covariance.unwrap_or([0.0; 3]),
        }))
    }

    /// Match every point; per-point failures are counted and skipped.
    ///
    /// Only an allocation failure or an invalid configuration aborts.
    pub fn match_points(
        &mut self,
        child: &MaskedImage<'_>,
        base: &MaskedImage<'_>,
        h: &Mat3,
        points: &[Pt2],
        opts: &MatchOptions,
    ) -> Result<MatchSet> {
        opts.check()?;
        let h_inv = invert_homography(h).ok_or(LmkError::NumericalDegeneracy("singular initial homography"))?;
        self.reserve(opts)?;

        let mut out = MatchSet::default();
        for p in points {
            match self.match_point(child, base, h, &h_inv, p, opts) {
                Ok(Some(m)) if m.score > opts.min_correlation => out.matched.push(m),
                Ok(Some(m)) => out.weak.push(m),
                Ok(None) => out.skipped += 1,
                Err(err @ LmkError::AllocationFailure(_)) => return Err(err),
                Err(_) => out.skipped += 1,
            }
        }
        debug!(
            "matched {} of {} points ({} weak, {} skipped)",
            out.matched.len(),
            points.len(),
            out.weak.len(),
            out.skipped
        );
        Ok(out)
    }
}
