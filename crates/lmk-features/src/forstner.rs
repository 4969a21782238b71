//! Förstner interest operator.
//!
//! For every pixel with a full `n x n` neighbourhood the operator sums the
//! gradient products `dx²`, `dy²` and `dx·dy` over the inner
//! `(n-2) x (n-2)` window, where `dx`, `dy` are central differences. From
//! the 2x2 moment matrix `M` it reports the larger eigenvalue of `M⁻¹`:
//! a small value means a well-conditioned, corner-like point.
//!
//! Sentinels in the output raster:
//! - [`OUTSIDE_VALID`] where the neighbourhood leaves the image;
//! - [`DEGENERATE`] where `det(M)` is too small to invert.
//!
//! The moment sums come from a [`WindowSums`] accumulator held in a
//! caller-owned [`ForstnerScratch`], so each pixel costs O(1) amortized and
//! repeated calls do not allocate once the scratch is reserved.
//!
//! # References
//!
//! W. Förstner, E. Gülch, "A fast operator for detection and precise
//! location of distinct points, corners and centres of circular features",
//! ISPRS Intercommission Workshop, 1987.

use lmk_core::{LmkError, Raster, RasterView, Real, Result, Window, WindowSums};

/// Interest value of pixels without a full neighbourhood.
pub const OUTSIDE_VALID: Real = -1.0;
/// Interest value of pixels whose moment matrix is singular.
pub const DEGENERATE: Real = -2.0;

const MIN_DET: Real = 1e-5;

/// A scored pixel, in absolute image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub col: usize,
    pub row: usize,
    pub value: Real,
}

/// Inverse moment matrix `[a b; b d]` of one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestCovariance {
    pub a: Real,
    pub b: Real,
    pub d: Real,
}

impl InterestCovariance {
    const fn sentinel(v: Real) -> Self {
        Self { a: v, b: v, d: v }
    }

    /// Larger eigenvalue.
    pub fn interest(&self) -> Real {
        let (a, b, d) = (self.a, self.b, self.d);
        0.5 * ((a + d) + ((a - d) * (a - d) + 4.0 * b * b).sqrt())
    }
}

/// Reusable accumulator storage for the operator.
#[derive(Debug, Clone, Default)]
pub struct ForstnerScratch {
    sums: WindowSums<3>,
}

impl ForstnerScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for images up to `max_cols` wide.
    pub fn reserve(&mut self, max_cols: usize) -> Result<()> {
        self.sums.reserve(max_cols)
    }

    /// Interest raster over `region` (output is `region.width x region.height`).
    pub fn interest(
        &mut self,
        image: &RasterView<'_, u8>,
        region: &Window,
        window: usize,
    ) -> Result<Raster<Real>> {
        let mut out = Raster::filled(region.width, region.height, OUTSIDE_VALID);
        self.scan(image, region, window, |col, row, cov| {
            out.set(col - region.left, row - region.top, cov.interest_or_sentinel());
        })?;
        Ok(out)
    }

    /// Interest raster over the whole image.
    pub fn interest_image(&mut self, image: &RasterView<'_, u8>, window: usize) -> Result<Raster<Real>> {
        self.interest(image, &Window::full(image.cols(), image.rows()), window)
    }

    /// Per-pixel inverse moment matrices over `region`.
    pub fn covariance(
        &mut self,
        image: &RasterView<'_, u8>,
        region: &Window,
        window: usize,
    ) -> Result<Raster<InterestCovariance>> {
        let mut out = Raster::filled(
            region.width,
            region.height,
            InterestCovariance::sentinel(OUTSIDE_VALID),
        );
        self.scan(image, region, window, |col, row, cov| {
            let v = match cov {
                Moments::Valid(c) => c,
                Moments::Degenerate => InterestCovariance::sentinel(DEGENERATE),
            };
            out.set(col - region.left, row - region.top, v);
        })?;
        Ok(out)
    }

    /// The single most interesting pixel in `region`, if any is valid.
    pub fn best(
        &mut self,
        image: &RasterView<'_, u8>,
        region: &Window,
        window: usize,
    ) -> Result<Option<Feature>> {
        let mut best: Option<Feature> = None;
        self.scan(image, region, window, |col, row, cov| {
            let value = cov.interest_or_sentinel();
            if value > 0.0 && best.map_or(true, |b| value < b.value) {
                best = Some(Feature { col, row, value });
            }
        })?;
        Ok(best)
    }

    /// The `count` most interesting pixels in `region`, best first.
    ///
    /// Keeps a fixed-size list and replaces its worst entry whenever a
    /// better pixel shows up.
    pub fn n_best(
        &mut self,
        image: &RasterView<'_, u8>,
        region: &Window,
        window: usize,
        count: usize,
    ) -> Result<Vec<Feature>> {
        let mut list: Vec<Feature> = Vec::with_capacity(count);
        if count == 0 {
            return Ok(list);
        }
        self.scan(image, region, window, |col, row, cov| {
            let value = cov.interest_or_sentinel();
            if value <= 0.0 {
                return;
            }
            let f = Feature { col, row, value };
            if list.len() < count {
                list.push(f);
                return;
            }
            let (worst, worst_value) = list
                .iter()
                .enumerate()
                .fold((0, Real::MIN), |acc, (i, g)| {
                    if g.value > acc.1 {
                        (i, g.value)
                    } else {
                        acc
                    }
                });
            if value < worst_value {
                list[worst] = f;
            }
        })?;
        list.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(list)
    }

    /// Visit every valid pixel of `region` with its moment matrix.
    fn scan<F>(
        &mut self,
        image: &RasterView<'_, u8>,
        region: &Window,
        window: usize,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize, Moments),
    {
        if window < 3 || window % 2 == 0 {
            return Err(LmkError::InvalidParameter(format!(
                "interest window must be odd and at least 3, got {window}"
            )));
        }
        if region.is_empty() || !region.fits(image.cols(), image.rows()) {
            return Err(LmkError::InvalidParameter(format!(
                "region {region:?} does not fit a {}x{} image",
                image.cols(),
                image.rows()
            )));
        }
        let w = window / 2;
        if image.cols() < window || image.rows() < window {
            return Ok(());
        }
        // valid centers, clipped to the region
        let x0 = region.left.max(w);
        let x1 = (region.right() - 1).min(image.cols() - w - 1);
        let y0 = region.top.max(w);
        let y1 = (region.bottom() - 1).min(image.rows() - w - 1);
        if x0 > x1 || y0 > y1 {
            return Ok(());
        }

        let inner = window - 2;
        let first_col = x0 + 1 - w;
        let n_columns = x1 - x0 + inner;
        let gradients = |c: usize, r: usize| {
            let x = first_col + c;
            let d0 = image.at(x + 1, r) as i64 - image.at(x - 1, r) as i64;
            let d1 = image.at(x, r + 1) as i64 - image.at(x, r - 1) as i64;
            [d0 * d0, d1 * d1, d0 * d1]
        };

        self.sums
            .start_band(inner, inner, n_columns, y0 + 1 - w, gradients)?;
        for y in y0..=y1 {
            if y > y0 {
                self.sums.advance_row(gradients);
                self.sums.start_row(0);
            }
            for x in x0..=x1 {
                if x > x0 {
                    self.sums.advance_column();
                }
                let [m00, m11, m10] = self.sums.sums();
                visit(x, y, Moments::from_sums(m00, m11, m10));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Moments {
    Valid(InterestCovariance),
    Degenerate,
}

impl Moments {
    fn from_sums(m00: i64, m11: i64, m10: i64) -> Self {
        let (m00, m11, m10) = (m00 as Real, m11 as Real, m10 as Real);
        let det = (m00 * m11 - m10 * m10) / 4.0;
        if det < MIN_DET {
            return Moments::Degenerate;
        }
        Moments::Valid(InterestCovariance {
            a: m11 / det,
            b: -m10 / det,
            d: m00 / det,
        })
    }

    fn interest_or_sentinel(&self) -> Real {
        match self {
            Moments::Valid(c) => c.interest(),
            Moments::Degenerate => DEGENERATE,
        }
    }
}
