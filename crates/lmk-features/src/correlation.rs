//! Normalized cross-correlation of a template over a search window.
//!
//! # Algorithm
//!
//! For each placement of the template `a` inside the search window `b` the
//! cross term comes from `Σ(a+b)² - Σa² - Σb² = 2Σab`, giving
//! `2Σ(a-ā)(b-b̄) = Σ(a+b)² - Σa² - Σb² - 2ΣaΣb/n`. `Σa`, `Σa²` are computed
//! once; `Σb`, `Σb²` come from per-column sums that slide one row down per
//! placement row and one column right per placement.
//!
//! Subpixel refinement fits the biquadratic
//! `f(c, r) = A0 c² + A1 r² + A2 cr + A3 c + A4 r + A5` to the 3x3 scores
//! around the best placement through a fixed least-squares matrix, and
//! moves to its stationary point. The peak must be interior and a strict
//! maximum, and the offset must stay below one pixel on both axes.

use lmk_core::{LmkError, RasterView, Real, Result, WindowSums};
use serde::{Deserialize, Serialize};

/// Least-squares biquadratic fit over a row-ordered 3x3 patch.
const FIT: [[Real; 9]; 6] = [
    [1.0 / 6.0, -2.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, -2.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, -2.0 / 6.0, 1.0 / 6.0],
    [1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, -2.0 / 6.0, -2.0 / 6.0, -2.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0],
    [0.25, 0.0, -0.25, 0.0, 0.0, 0.0, -0.25, 0.0, 0.25],
    [-1.0 / 6.0, 0.0, 1.0 / 6.0, -1.0 / 6.0, 0.0, 1.0 / 6.0, -1.0 / 6.0, 0.0, 1.0 / 6.0],
    [-1.0 / 6.0, -1.0 / 6.0, -1.0 / 6.0, 0.0, 0.0, 0.0, 1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0],
    [-1.0 / 9.0, 2.0 / 9.0, -1.0 / 9.0, 2.0 / 9.0, 5.0 / 9.0, 2.0 / 9.0, -1.0 / 9.0, 2.0 / 9.0, -1.0 / 9.0],
];

const MIN_FIT_DENOM: Real = 1e-6;
/// Score of a placement over a uniform search patch.
pub const FLAT_PLACEMENT_SCORE: Real = -1.0;

/// How the cross term is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NccNormalization {
    /// `Σ(a-ā)(b-b̄) / sqrt(Σ(a-ā)² Σ(b-b̄)²)`, the Pearson coefficient.
    #[default]
    Product,
    /// `2Σ(a-ā)(b-b̄) / (Σ(a-ā)² + Σ(b-b̄)²)`, which also penalizes contrast changes.
    Sum,
}

/// Search window in image coordinates. The origin may be negative; it is
/// clamped to zero and the window clipped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub left: isize,
    pub top: isize,
    pub width: usize,
    pub height: usize,
}

/// Best template placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Search-image column of the template center.
    pub col: Real,
    /// Search-image row of the template center.
    pub row: Real,
    /// Correlation score (fitted peak value when refined).
    pub score: Real,
    /// `[c_cc, c_cr, c_rr]` curvature-derived covariance when refined.
    pub covariance: Option<[Real; 3]>,
}

/// Reusable buffers for [`CorrelationScratch::correlate`].
#[derive(Debug, Clone, Default)]
pub struct CorrelationScratch {
    sums: WindowSums<2>,
    scores: Vec<Real>,
}

fn clip_axis(origin: isize, extent: usize, limit: usize) -> (usize, usize) {
    let (start, extent) = if origin < 0 {
        (0, extent + origin.unsigned_abs())
    } else {
        (origin as usize, extent)
    };
    let start = start.min(limit);
    (start, extent.min(limit - start))
}

impl CorrelationScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for search windows up to `max_search` wide and
    /// `max_placements` template placements.
    pub fn reserve(&mut self, max_search: usize, max_placements: usize) -> Result<()> {
        self.sums.reserve(max_search)?;
        if max_placements > self.scores.capacity() {
            self.scores
                .try_reserve(max_placements - self.scores.len())
                .map_err(|_| LmkError::AllocationFailure(max_placements))?;
        }
        Ok(())
    }

    /// Correlate `template` over `search` in `image`.
    ///
    /// With `refine` the peak is fitted to subpixel precision and the
    /// covariance reported; otherwise the best integer placement is returned
    /// with its raw score.
    pub fn correlate(
        &mut self,
        template: &RasterView<'_, u8>,
        image: &RasterView<'_, u8>,
        search: &SearchWindow,
        normalization: NccNormalization,
        refine: bool,
    ) -> Result<CorrelationPeak> {
        let (tc, tr) = (template.cols(), template.rows());
        if search.width < tc || search.height < tr {
            return Err(LmkError::InvalidParameter(format!(
                "search window {}x{} smaller than template {tc}x{tr}",
                search.width, search.height
            )));
        }
        let (left, width) = clip_axis(search.left, search.width, image.cols());
        let (top, height) = clip_axis(search.top, search.height, image.rows());
        if width < tc || height < tr {
            return Err(LmkError::BoundaryViolation {
                x: search.left as Real,
                y: search.top as Real,
            });
        }

        let n = (tc * tr) as Real;
        let (mut suma, mut sumasq) = (0i64, 0i64);
        for &a in template.data() {
            suma += a as i64;
            sumasq += (a as i64) * (a as i64);
        }
        let suma = suma as Real;
        let sumasq = sumasq as Real;
        let normsumasq = sumasq - suma * suma / n;
        if normsumasq == 0.0 {
            return Err(LmkError::NumericalDegeneracy("uniform template"));
        }

        let pc = width - tc + 1;
        let pr = height - tr + 1;
        self.scores.clear();
        if pc * pr > self.scores.capacity() {
            self.scores
                .try_reserve(pc * pr)
                .map_err(|_| LmkError::AllocationFailure(pc * pr))?;
        }

        let values = |c: usize, r: usize| {
            let b = image.at(left + c, r) as i64;
            [b, b * b]
        };
        self.sums.start_band(tc, tr, width, top, values)?;

        let mut best = (Real::MIN, 0usize, 0usize);
        for row in 0..pr {
            if row > 0 {
                self.sums.advance_row(values);
                self.sums.start_row(0);
            }
            for col in 0..pc {
                if col > 0 {
                    self.sums.advance_column();
                }
                let [sumb, sumbsq] = self.sums.sums();
                let (sumb, sumbsq) = (sumb as Real, sumbsq as Real);

                let mut sumabsq = 0i64;
                for r in 0..tr {
                    let trow = &template.data()[r * tc..(r + 1) * tc];
                    let start = (top + row + r) * image.cols() + left + col;
                    let irow = &image.data()[start..start + tc];
                    for (&a, &b) in trow.iter().zip(irow) {
                        let s = a as i64 + b as i64;
                        sumabsq += s * s;
                    }
                }
                let normsumbsq = sumbsq - sumb * sumb / n;
                let normsumab = sumabsq as Real - sumasq - sumbsq - 2.0 * suma * sumb / n;
                let coeff = match normalization {
                    _ if normsumbsq <= 0.0 => FLAT_PLACEMENT_SCORE,
                    NccNormalization::Product => normsumab / (2.0 * (normsumasq * normsumbsq).sqrt()),
                    NccNormalization::Sum => normsumab / (normsumasq + normsumbsq),
                };
                self.scores.push(coeff);
                if coeff > best.0 {
                    best = (coeff, row, col);
                }
            }
        }

        let (score, br, bc) = best;
        let (row, col, score, covariance) = if refine {
            let fit = subpixel(&self.scores, pr, pc, br, bc)?;
            (br as Real + fit.dr, bc as Real + fit.dc, fit.value, Some(fit.covariance))
        } else {
            (br as Real, bc as Real, score, None)
        };

        Ok(CorrelationPeak {
            col: col + left as Real + (tc as Real - 1.0) * 0.5,
            row: row + top as Real + (tr as Real - 1.0) * 0.5,
            score,
            covariance,
        })
    }
}

/// Subpixel peak of a score surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubpixelFit {
    pub dc: Real,
    pub dr: Real,
    pub value: Real,
    pub covariance: [Real; 3],
}

/// Fit the biquadratic around `(best_row, best_col)` of a `rows x cols`
/// score grid.
pub fn subpixel(
    scores: &[Real],
    rows: usize,
    cols: usize,
    best_row: usize,
    best_col: usize,
) -> Result<SubpixelFit> {
    if best_row == 0 || best_col == 0 || best_row + 1 >= rows || best_col + 1 >= cols {
        return Err(LmkError::NumericalDegeneracy("correlation peak on the border"));
    }
    let peak = scores[best_row * cols + best_col];
    let mut q = [0.0; 9];
    for (k, qk) in q.iter_mut().enumerate() {
        let r = best_row + k / 3 - 1;
        let c = best_col + k % 3 - 1;
        *qk = scores[r * cols + c];
        if k != 4 && *qk >= peak {
            return Err(LmkError::NumericalDegeneracy("correlation peak is not a strict maximum"));
        }
    }

    let mut a = [0.0; 6];
    for (ak, row) in a.iter_mut().zip(FIT.iter()) {
        *ak = row.iter().zip(&q).map(|(f, v)| f * v).sum();
    }
    let denom = 4.0 * a[0] * a[1] - a[2] * a[2];
    if denom.abs() < MIN_FIT_DENOM {
        return Err(LmkError::NumericalDegeneracy("ill-conditioned correlation peak"));
    }
    let covariance = [-2.0 * a[1] / denom, a[2] / denom, -2.0 * a[0] / denom];
    let dc = (-2.0 * a[1] * a[3] + a[2] * a[4]) / denom;
    let dr = (-2.0 * a[0] * a[4] + a[2] * a[3]) / denom;
    if dc.abs() >= 1.0 || dr.abs() >= 1.0 {
        return Err(LmkError::NumericalDegeneracy("subpixel offset exceeds one pixel"));
    }
    let value = a[0] * dc * dc + a[1] * dr * dr + a[2] * dc * dr + a[3] * dc + a[4] * dr + a[5];
    Ok(SubpixelFit {
        dc,
        dr,
        value,
        covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(cols: usize, rows: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..cols * rows).map(|_| rng.random()).collect()
    }

    fn cut(data: &[u8], cols: usize, left: usize, top: usize, w: usize, h: usize) -> Vec<u8> {
        (top..top + h)
            .flat_map(|r| data[r * cols + left..r * cols + left + w].iter().copied())
            .collect()
    }

    #[test]
    fn exact_copy_scores_one_at_known_offset() {
        let data = noise(60, 50, 3);
        let image = RasterView::new(&data, 60, 50).unwrap();
        let t = cut(&data, 60, 23, 17, 11, 9);
        let template = RasterView::new(&t, 11, 9).unwrap();
        let search = SearchWindow {
            left: 15,
            top: 10,
            width: 31,
            height: 25,
        };
        let peak = CorrelationScratch::new()
            .correlate(&template, &image, &search, NccNormalization::Product, false)
            .unwrap();
        assert!((peak.score - 1.0).abs() < 1e-12);
        assert_eq!(peak.col, 23.0 + 5.0);
        assert_eq!(peak.row, 17.0 + 4.0);
        assert!(peak.covariance.is_none());
    }

    #[test]
    fn both_normalizations_score_one_for_a_copy() {
        let data = noise(40, 40, 8);
        let image = RasterView::new(&data, 40, 40).unwrap();
        let t = cut(&data, 40, 12, 14, 7, 7);
        let template = RasterView::new(&t, 7, 7).unwrap();
        let search = SearchWindow {
            left: 5,
            top: 5,
            width: 25,
            height: 25,
        };
        let mut scratch = CorrelationScratch::new();
        for norm in [NccNormalization::Product, NccNormalization::Sum] {
            let peak = scratch.correlate(&template, &image, &search, norm, false).unwrap();
            assert!((peak.score - 1.0).abs() < 1e-12, "{norm:?}");
            assert_eq!((peak.col, peak.row), (15.0, 17.0));
        }
    }

    #[test]
    fn scores_match_direct_pearson() {
        let data = noise(30, 30, 5);
        let image = RasterView::new(&data, 30, 30).unwrap();
        let t = noise(5, 5, 6);
        let template = RasterView::new(&t, 5, 5).unwrap();
        let search = SearchWindow {
            left: 2,
            top: 3,
            width: 20,
            height: 18,
        };
        let mut scratch = CorrelationScratch::new();
        scratch
            .correlate(&template, &image, &search, NccNormalization::Product, false)
            .unwrap();

        let pearson = |left: usize, top: usize| {
            let b = cut(&data, 30, left, top, 5, 5);
            let ma = t.iter().map(|&v| v as Real).sum::<Real>() / 25.0;
            let mb = b.iter().map(|&v| v as Real).sum::<Real>() / 25.0;
            let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
            for (&x, &y) in t.iter().zip(&b) {
                let (x, y) = (x as Real - ma, y as Real - mb);
                sab += x * y;
                saa += x * x;
                sbb += y * y;
            }
            sab / (saa * sbb).sqrt()
        };
        let pc = 20 - 5 + 1;
        for (k, s) in scratch.scores.iter().enumerate() {
            let (r, c) = (k / pc, k % pc);
            assert!((s - pearson(2 + c, 3 + r)).abs() < 1e-9);
        }
    }

    #[test]
    fn uniform_template_fails() {
        let data = noise(20, 20, 1);
        let image = RasterView::new(&data, 20, 20).unwrap();
        let t = vec![9u8; 9];
        let template = RasterView::new(&t, 3, 3).unwrap();
        let search = SearchWindow {
            left: 0,
            top: 0,
            width: 10,
            height: 10,
        };
        assert!(matches!(
            CorrelationScratch::new().correlate(&template, &image, &search, NccNormalization::Product, false),
            Err(LmkError::NumericalDegeneracy(_))
        ));
    }

    #[test]
    fn flat_search_region_scores_minus_one() {
        let mut data = vec![50u8; 30 * 30];
        data[0] = 51;
        let image = RasterView::new(&data, 30, 30).unwrap();
        let t: Vec<u8> = (0..9).map(|v| v as u8 * 20).collect();
        let template = RasterView::new(&t, 3, 3).unwrap();
        let search = SearchWindow {
            left: 10,
            top: 10,
            width: 8,
            height: 8,
        };
        let peak = CorrelationScratch::new()
            .correlate(&template, &image, &search, NccNormalization::Product, false)
            .unwrap();
        assert_eq!(peak.score, FLAT_PLACEMENT_SCORE);
    }

    #[test]
    fn search_smaller_than_template_rejected() {
        let data = noise(20, 20, 1);
        let image = RasterView::new(&data, 20, 20).unwrap();
        let t = noise(5, 5, 2);
        let template = RasterView::new(&t, 5, 5).unwrap();
        let search = SearchWindow {
            left: 0,
            top: 0,
            width: 4,
            height: 9,
        };
        assert!(matches!(
            CorrelationScratch::new().correlate(&template, &image, &search, NccNormalization::Product, false),
            Err(LmkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn negative_origin_is_clamped() {
        let data = noise(40, 40, 4);
        let image = RasterView::new(&data, 40, 40).unwrap();
        let t = cut(&data, 40, 2, 3, 7, 7);
        let template = RasterView::new(&t, 7, 7).unwrap();
        let search = SearchWindow {
            left: -5,
            top: -4,
            width: 15,
            height: 15,
        };
        let peak = CorrelationScratch::new()
            .correlate(&template, &image, &search, NccNormalization::Product, false)
            .unwrap();
        assert_eq!((peak.col, peak.row), (5.0, 6.0));
    }

    #[test]
    fn subpixel_recovers_quadratic_peak() {
        // f(c, r) = 1 - 0.1 (c - 3.3)² - 0.2 (r - 2.6)², sampled on a 6x5 grid
        let (rows, cols) = (5, 6);
        let scores: Vec<Real> = (0..rows * cols)
            .map(|k| {
                let (r, c) = ((k / cols) as Real, (k % cols) as Real);
                1.0 - 0.1 * (c - 3.3).powi(2) - 0.2 * (r - 2.6).powi(2)
            })
            .collect();
        let fit = subpixel(&scores, rows, cols, 3, 3).unwrap();
        assert!((fit.dc - 0.3).abs() < 1e-9);
        assert!((fit.dr + 0.4).abs() < 1e-9);
        assert!((fit.value - 1.0).abs() < 1e-9);
        assert!(fit.covariance[0] > 0.0 && fit.covariance[2] > 0.0);
    }

    #[test]
    fn subpixel_rejects_border_and_plateau() {
        let flat = vec![0.5; 25];
        assert!(subpixel(&flat, 5, 5, 0, 2).is_err());
        assert!(subpixel(&flat, 5, 5, 2, 4).is_err());
        assert!(subpixel(&flat, 5, 5, 2, 2).is_err());

        let mut tie = vec![0.0; 25];
        tie[12] = 1.0;
        tie[13] = 1.0;
        assert!(subpixel(&tie, 5, 5, 2, 2).is_err());
    }
}
