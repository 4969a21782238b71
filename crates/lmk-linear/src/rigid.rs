//! Rigid alignment of corresponding 3D point sets.
//!
//! Finds `R`, `t` minimizing `Σ |R a_i + t - b_i|²`.
//!
//! # Algorithm
//!
//! Kabsch: center both sets, accumulate the cross-covariance
//! `H = Σ (b_i - b̄)(a_i - ā)ᵀ`, take `R = U Vᵀ` from its SVD (flipping the
//! last column of `U` if that would produce a reflection), then
//! `t = b̄ - R ā`.
//!
//! # References
//!
//! W. Kabsch, "A solution for the best rotation to relate two sets of
//! vectors", Acta Crystallographica A32, 1976.

use lmk_core::{ransac, Estimator, Iso3, LmkError, Mat3, RansacOptions, Real, Result, Vec3};
use log::debug;
use nalgebra::{Isometry3, Rotation3, Translation3, UnitQuaternion};
use rand::Rng;

use crate::math::centroid_3d;

/// Entry points for rigid alignment.
#[derive(Debug, Clone, Copy)]
pub struct RigidSolver;

/// Output of a robust rigid fit.
#[derive(Debug, Clone)]
pub struct RigidFit {
    /// Maps points of the first set onto the second.
    pub transform: Iso3,
    pub inliers: Vec<usize>,
}

/// Default options for [`RigidSolver::ransac`]: 30 iterations, a single
/// refinement round, at least 7 final inliers.
pub fn rigid_ransac_options(tolerance: Real) -> RansacOptions {
    RansacOptions {
        max_iters: 30,
        thresh: tolerance,
        min_inliers: 7,
        refine_rounds: 1,
        refine_min_inliers: 0,
    }
}

/// Closed-form rigid transform with `b ≈ T a`.
pub fn rigid_alignment(a: &[Vec3], b: &[Vec3]) -> Result<Iso3> {
    RigidSolver::kabsch(a, b)
}

impl RigidSolver {
    /// Closed-form least-squares alignment from at least three pairs.
    pub fn kabsch(a: &[Vec3], b: &[Vec3]) -> Result<Iso3> {
        if a.len() != b.len() {
            return Err(LmkError::InvalidParameter(format!(
                "{} source points but {} target points",
                a.len(),
                b.len()
            )));
        }
        if a.len() < 3 {
            return Err(LmkError::InsufficientData {
                needed: 3,
                got: a.len(),
            });
        }
        let insufficient = || LmkError::InsufficientData { needed: 3, got: 0 };
        let ca = centroid_3d(a).ok_or_else(insufficient)?;
        let cb = centroid_3d(b).ok_or_else(insufficient)?;

        let mut h = Mat3::zeros();
        for (pa, pb) in a.iter().zip(b) {
            h += (pb - cb) * (pa - ca).transpose();
        }

        let svd = h.svd(true, true);
        let u = svd.u.ok_or(LmkError::NumericalDegeneracy("svd failed"))?;
        let v_t = svd.v_t.ok_or(LmkError::NumericalDegeneracy("svd failed"))?;
        let mut r = u * v_t;
        if r.determinant() < 0.0 {
            let mut u_fix = u;
            u_fix.column_mut(2).neg_mut();
            r = u_fix * v_t;
        }

        let t = cb - r * ca;
        let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        Ok(Isometry3::from_parts(Translation3::from(t), rot))
    }

    /// Robust alignment; `opts.thresh` is the 3D residual tolerance.
    ///
    /// After the final refit the inlier set is re-scored against the
    /// refitted transform, so the reported inliers are exactly the pairs
    /// that `transform` explains within tolerance. This can differ from the
    /// consensus set of the best sample.
    pub fn ransac<R: Rng + ?Sized>(
        a: &[Vec3],
        b: &[Vec3],
        opts: &RansacOptions,
        rng: &mut R,
    ) -> Result<RigidFit> {
        if a.len() != b.len() {
            return Err(LmkError::InvalidParameter(format!(
                "{} source points but {} target points",
                a.len(),
                b.len()
            )));
        }
        if a.len() < 3 {
            return Err(LmkError::InsufficientData {
                needed: 3,
                got: a.len(),
            });
        }

        struct PairDatum {
            a: Vec3,
            b: Vec3,
        }

        struct RigidEst;

        impl Estimator for RigidEst {
            type Datum = PairDatum;
            type Model = Iso3;

            const MIN_SAMPLES: usize = 3;

            fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
                let (a, b): (Vec<Vec3>, Vec<Vec3>) =
                    sample_indices.iter().map(|&i| (data[i].a, data[i].b)).unzip();
                RigidSolver::kabsch(&a, &b).ok()
            }

            fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
                (model.transform_vector(&datum.a) + model.translation.vector - datum.b).norm()
            }
        }

        let data: Vec<PairDatum> = a
            .iter()
            .zip(b)
            .map(|(&a, &b)| PairDatum { a, b })
            .collect();
        let res = ransac::<RigidEst, R>(&data, opts, rng);
        debug!(
            "rigid ransac: {} of {} inliers (rms {:.3})",
            res.inliers.len(),
            data.len(),
            res.inlier_rms
        );
        match res.model {
            Some(transform) if res.success => Ok(RigidFit {
                transform,
                inliers: res.inliers,
            }),
            _ => Err(LmkError::ConsensusFailure {
                inliers: res.inliers.len(),
                required: opts.min_inliers,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cloud(rng: &mut StdRng, n: usize) -> Vec<Vec3> {
        (0..n)
            .map(|_| {
                Vec3::new(
                    rng.random_range(-500.0..500.0),
                    rng.random_range(-500.0..500.0),
                    rng.random_range(-50.0..50.0),
                )
            })
            .collect()
    }

    fn truth() -> Iso3 {
        let rot = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -0.1);
        Isometry3::from_parts(Translation3::new(12.0, -7.5, 3.25), rot)
    }

    #[test]
    fn kabsch_recovers_exact_transform() {
        let mut rng = StdRng::seed_from_u64(5);
        let a = cloud(&mut rng, 12);
        let t = truth();
        let b: Vec<Vec3> = a.iter().map(|p| t.transform_point(&(*p).into()).coords).collect();
        let est = RigidSolver::kabsch(&a, &b).unwrap();
        let r = est.rotation.to_rotation_matrix().into_inner();
        assert!((r.determinant() - 1.0).abs() < 1e-9);
        assert!((r * r.transpose() - Mat3::identity()).norm() < 1e-9);
        assert!((r - t.rotation.to_rotation_matrix().into_inner()).norm() < 1e-9);
        assert!((est.translation.vector - t.translation.vector).norm() < 1e-6);
    }

    #[test]
    fn kabsch_never_returns_reflection() {
        let a = vec![
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ];
        // mirrored through the xy plane
        let b: Vec<Vec3> = a.iter().map(|p| Vec3::new(p.x, p.y, -p.z)).collect();
        let est = RigidSolver::kabsch(&a, &b).unwrap();
        let r = est.rotation.to_rotation_matrix().into_inner();
        assert!((r.determinant() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn kabsch_needs_three_points() {
        let a = vec![Vec3::zeros(); 2];
        assert!(matches!(
            RigidSolver::kabsch(&a, &a),
            Err(LmkError::InsufficientData { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn ransac_ignores_gross_outliers() {
        let mut rng = StdRng::seed_from_u64(21);
        let a = cloud(&mut rng, 40);
        let t = truth();
        let mut b: Vec<Vec3> = a.iter().map(|p| t.transform_point(&(*p).into()).coords).collect();
        for p in b.iter_mut().take(10) {
            *p += Vec3::new(400.0, -250.0, 90.0);
        }
        let fit = RigidSolver::ransac(&a, &b, &rigid_ransac_options(1.0), &mut rng).unwrap();
        assert_eq!(fit.inliers.len(), 30);
        assert!(fit.inliers.iter().all(|&i| i >= 10));
        assert!((fit.transform.translation.vector - t.translation.vector).norm() < 1e-6);
    }

    #[test]
    fn reported_inliers_agree_with_the_refitted_transform() {
        let mut rng = StdRng::seed_from_u64(33);
        let a = cloud(&mut rng, 30);
        let t = truth();
        let mut b: Vec<Vec3> = a
            .iter()
            .map(|p| {
                let noise = Vec3::new(
                    rng.random_range(-0.6..0.6),
                    rng.random_range(-0.6..0.6),
                    rng.random_range(-0.6..0.6),
                );
                t.transform_point(&(*p).into()).coords + noise
            })
            .collect();
        for p in b.iter_mut().take(5) {
            *p += Vec3::new(-300.0, 120.0, 60.0);
        }
        let opts = rigid_ransac_options(2.0);
        let fit = RigidSolver::ransac(&a, &b, &opts, &mut rng).unwrap();
        for (i, (pa, pb)) in a.iter().zip(&b).enumerate() {
            let r = (fit.transform.transform_point(&(*pa).into()).coords - pb).norm();
            assert_eq!(fit.inliers.contains(&i), r < opts.thresh, "pair {i} residual {r}");
        }
    }

    #[test]
    fn ransac_requires_seven_inliers() {
        let mut rng = StdRng::seed_from_u64(2);
        let a = cloud(&mut rng, 6);
        let b = a.clone();
        assert!(matches!(
            RigidSolver::ransac(&a, &b, &rigid_ransac_options(1.0), &mut rng),
            Err(LmkError::ConsensusFailure { inliers: 6, required: 7 })
        ));
    }
}
