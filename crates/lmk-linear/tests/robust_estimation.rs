use lmk_core::{transfer, Mat3, Pt2, RansacOptions, Real, Vec3};
use lmk_linear::{rigid_ransac_options, HomographySolver, RigidSolver};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn homography_ransac_is_reproducible_and_robust() {
    let h = Mat3::new(0.97, -0.05, 12.0, 0.06, 1.01, -8.0, -2e-5, 3e-5, 1.0);
    let mut data_rng = StdRng::seed_from_u64(100);
    let n_in = 60;
    let n_out = 25;
    let mut src = Vec::new();
    let mut dst = Vec::new();
    for _ in 0..n_in {
        let p = Pt2::new(data_rng.random_range(0.0..400.0), data_rng.random_range(0.0..300.0));
        src.push(p);
        dst.push(transfer(&h, &p));
    }
    for _ in 0..n_out {
        src.push(Pt2::new(data_rng.random_range(0.0..400.0), data_rng.random_range(0.0..300.0)));
        dst.push(Pt2::new(data_rng.random_range(0.0..400.0), data_rng.random_range(0.0..300.0)));
    }
    let opts = RansacOptions {
        thresh: 1.0,
        ..RansacOptions::default()
    };

    let a = HomographySolver::ransac(&src, &dst, &opts, &mut StdRng::seed_from_u64(3)).unwrap();
    let b = HomographySolver::ransac(&src, &dst, &opts, &mut StdRng::seed_from_u64(3)).unwrap();
    assert_eq!(a.inliers, b.inliers);
    assert_eq!(a.h, b.h);

    assert!(a.inliers.len() >= n_in);
    for i in 0..n_in {
        assert!(a.inliers.contains(&i));
    }
    for p in &src[..n_in] {
        assert!((transfer(&a.h, p) - transfer(&h, p)).norm() < 1e-6);
    }
}

#[test]
fn rigid_ransac_with_noise_stays_close() {
    let rot = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.02);
    let t = Isometry3::from_parts(Translation3::new(-40.0, 25.0, 6.0), rot);
    let mut rng = StdRng::seed_from_u64(8);
    let mut a = Vec::new();
    let mut b = Vec::new();
    for i in 0..50 {
        let p = Vec3::new(
            rng.random_range(-800.0..800.0),
            rng.random_range(-800.0..800.0),
            rng.random_range(-30.0..30.0),
        );
        let noise = Vec3::new(
            rng.random_range(-0.2..0.2),
            rng.random_range(-0.2..0.2),
            rng.random_range(-0.2..0.2),
        );
        let mut q = t.transform_point(&p.into()).coords + noise;
        if i % 5 == 0 {
            q += Vec3::new(0.0, 0.0, 150.0 + i as Real);
        }
        a.push(p);
        b.push(q);
    }
    let fit = RigidSolver::ransac(&a, &b, &rigid_ransac_options(5.0), &mut rng).unwrap();
    assert_eq!(fit.inliers.len(), 40);
    assert!(fit.transform.rotation.angle_to(&rot) < 1e-3);
    assert!((fit.transform.translation.vector - t.translation.vector).norm() < 0.5);
}
