//! Generic, model-agnostic RANSAC implementation.
//!
//! Implement [`Estimator`] for a model and call [`ransac`] with the data, a
//! set of [`RansacOptions`] and a caller-owned random generator. The loop
//! always runs `max_iters` iterations; with a seeded generator the result is
//! fully reproducible.
//!
//! After the sampling phase the best consensus set may be refined: the model
//! is re-fitted on its inliers and the data re-scored, `refine_rounds` times,
//! provided the consensus reached `refine_min_inliers`.
//!
//! The function does not panic on failure: when consensus is not reached it
//! returns a [`RansacResult`] with `success == false` and `model == None`.

use rand::prelude::IndexedRandom;
use rand::Rng;

/// Configuration parameters for the generic RANSAC engine.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Number of sampling iterations. Every iteration runs.
    pub max_iters: usize,
    /// A datum is an inlier when its residual is strictly below this.
    pub thresh: f64,
    /// Minimum number of final inliers required to accept a model.
    pub min_inliers: usize,
    /// Number of refit/re-score rounds on the best consensus set.
    pub refine_rounds: usize,
    /// Refinement only runs when the best consensus is at least this large.
    pub refine_min_inliers: usize,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            thresh: 2.0,
            min_inliers: 4,
            refine_rounds: 3,
            refine_min_inliers: 11,
        }
    }
}

/// Output of a RANSAC run.
///
/// Check [`success`](Self::success) before using the model.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    /// Whether a consensus set satisfying the options was found.
    pub success: bool,
    /// Best model found (if any).
    pub model: Option<M>,
    /// Indices of inlier data points of the best model.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: f64,
    /// Iteration at which the best sample was drawn.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// Generic estimator for RANSAC-like methods.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal number of samples needed to estimate a model.
    const MIN_SAMPLES: usize;

    /// Fit a model from a subset of data indices.
    ///
    /// Return `None` if the subset is degenerate or fitting fails.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual for one datum, in the units of `opts.thresh`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Optional degeneracy check on the sample subset.
    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Refit on an inlier set. Defaults to [`Estimator::fit`] on all of them.
    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        Self::fit(data, inliers)
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / (vals.len() as f64)).sqrt()
}

fn is_better_model(
    has_current_best: bool,
    new_inlier_count: usize,
    new_inlier_rms: f64,
    best_inlier_count: usize,
    best_inlier_rms: f64,
) -> bool {
    !has_current_best
        || (new_inlier_count > best_inlier_count)
        || (new_inlier_count == best_inlier_count && new_inlier_rms < best_inlier_rms)
}

fn score<E: Estimator>(
    model: &E::Model,
    data: &[E::Datum],
    thresh: f64,
    inliers: &mut Vec<usize>,
    residuals: &mut Vec<f64>,
) {
    inliers.clear();
    residuals.clear();
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r < thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
}

/// Run a RANSAC loop for a given [`Estimator`] implementation.
pub fn ransac<E, R>(data: &[E::Datum], opts: &RansacOptions, rng: &mut R) -> RansacResult<E::Model>
where
    E: Estimator,
    R: Rng + ?Sized,
{
    let mut best: RansacResult<E::Model> = RansacResult::default();
    let mut has_best = false;

    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample_idxs = vec![0usize; E::MIN_SAMPLES];
    let mut inliers = Vec::<usize>::with_capacity(data.len());
    let mut residuals = Vec::<f64>::with_capacity(data.len());

    for iter in 1..=opts.max_iters {
        all_indices
            .as_slice()
            .choose_multiple(rng, E::MIN_SAMPLES)
            .enumerate()
            .for_each(|(k, &idx)| sample_idxs[k] = idx);

        if E::is_degenerate(data, &sample_idxs) {
            continue;
        }
        let Some(model) = E::fit(data, &sample_idxs) else {
            continue;
        };

        score::<E>(&model, data, opts.thresh, &mut inliers, &mut residuals);
        let inlier_rms = rms(&residuals);

        if is_better_model(
            has_best,
            inliers.len(),
            inlier_rms,
            best.inliers.len(),
            best.inlier_rms,
        ) {
            has_best = true;
            best.model = Some(model);
            best.inliers.clone_from(&inliers);
            best.inlier_rms = inlier_rms;
            best.iters = iter;
        }
    }

    if best.inliers.len() >= opts.refine_min_inliers {
        for _ in 0..opts.refine_rounds {
            if best.inliers.len() < E::MIN_SAMPLES {
                break;
            }
            let Some(model) = E::refit(data, &best.inliers) else {
                break;
            };
            score::<E>(&model, data, opts.thresh, &mut inliers, &mut residuals);
            best.model = Some(model);
            best.inliers.clone_from(&inliers);
            best.inlier_rms = rms(&residuals);
        }
    }

    best.success = best.model.is_some() && best.inliers.len() >= opts.min_inliers;
    if !best.success {
        best.model = None;
    }
    best
}
