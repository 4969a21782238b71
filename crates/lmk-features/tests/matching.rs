use lmk_core::{LmkError, Mat3, Pt2, RasterView, Real, Vec3, Window};
use lmk_features::{
    subpixel, CorrelationResults, DenseMatcher, EvenDistribution, ForstnerScratch, MaskedImage, MatchOptions,
    MatchScratch, SlidingWindowOptions,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random texture upsampled by 3 so bilinear resampling keeps it correlated.
fn texture(cols: usize, rows: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let cc = cols / 3 + 2;
    let coarse: Vec<u8> = (0..cc * (rows / 3 + 2)).map(|_| rng.random()).collect();
    (0..cols * rows)
        .map(|k| {
            let (x, y) = (k % cols, k / cols);
            let (fx, fy) = ((x % 3) as Real / 3.0, (y % 3) as Real / 3.0);
            let v = |i: usize, j: usize| coarse[j * cc + i] as Real;
            let (gx, gy) = (x / 3, y / 3);
            let top = v(gx, gy) * (1.0 - fx) + v(gx + 1, gy) * fx;
            let bot = v(gx, gy + 1) * (1.0 - fx) + v(gx + 1, gy + 1) * fx;
            (top * (1.0 - fy) + bot * fy).round() as u8
        })
        .collect()
}

fn shifted(data: &[u8], cols: usize, rows: usize, sx: usize, sy: usize) -> Vec<u8> {
    (0..cols * rows)
        .map(|k| {
            let (x, y) = (k % cols, k / cols);
            if x >= sx && y >= sy {
                data[(y - sy) * cols + x - sx]
            } else {
                0
            }
        })
        .collect()
}

#[test]
fn dense_matching_recovers_a_uniform_shift() {
    let (cols, rows) = (120, 120);
    let child = texture(cols, rows, 11);
    let base = shifted(&child, cols, rows, 2, 1);
    let ci = MaskedImage::unmasked(RasterView::new(&child, cols, rows).unwrap());
    let bi = MaskedImage::unmasked(RasterView::new(&base, cols, rows).unwrap());

    let match_opts = MatchOptions {
        template_size: 11,
        search_size: 21,
        ..MatchOptions::default()
    };
    let opts = SlidingWindowOptions {
        block_size: 60,
        min_features: 10,
        ..SlidingWindowOptions::default()
    };
    let mut out = CorrelationResults::new(cols, rows);
    let mut rng = StdRng::seed_from_u64(5);
    let stats = DenseMatcher::new()
        .run(
            &ci,
            &bi,
            &Mat3::identity(),
            &match_opts,
            &opts,
            |c: &Pt2, b: &Pt2| Some(Vec3::new(b.x - c.x, b.y - c.y, 0.0)),
            &mut rng,
            &mut out,
        )
        .unwrap();

    assert_eq!(stats.blocks, 4);
    assert_eq!(stats.blocks_used, 4);
    assert!(stats.inliers > 100);
    assert!(out.num_valid() > cols * rows / 2);
    for k in 0..cols * rows {
        let (dx, dy) = (out.delta_x.data()[k], out.delta_y.data()[k]);
        if dx.is_nan() {
            assert!(out.correlation.data()[k].is_nan());
            continue;
        }
        assert!((dx - 2.0).abs() < 0.5, "dx {dx} at {k}");
        assert!((dy - 1.0).abs() < 0.5, "dy {dy} at {k}");
        assert_eq!(out.delta_z.data()[k], 0.0);
    }
}

#[test]
fn blocks_below_the_feature_minimum_leave_nan() {
    let (cols, rows) = (60, 60);
    let child = texture(cols, rows, 12);
    let ci = MaskedImage::unmasked(RasterView::new(&child, cols, rows).unwrap());
    let match_opts = MatchOptions {
        template_size: 11,
        search_size: 21,
        ..MatchOptions::default()
    };
    let opts = SlidingWindowOptions {
        block_size: 60,
        min_features: 10_000,
        ..SlidingWindowOptions::default()
    };
    let mut out = CorrelationResults::new(cols, rows);
    let stats = DenseMatcher::new()
        .run(
            &ci,
            &ci,
            &Mat3::identity(),
            &match_opts,
            &opts,
            |_: &Pt2, _: &Pt2| Some(Vec3::zeros()),
            &mut StdRng::seed_from_u64(1),
            &mut out,
        )
        .unwrap();
    assert!(stats.matched > 0);
    assert_eq!(stats.blocks_used, 0);
    assert_eq!(out.num_valid(), 0);
}

#[test]
fn selected_features_match_themselves() {
    let (cols, rows) = (100, 100);
    let data = texture(cols, rows, 13);
    let view = RasterView::new(&data, cols, rows).unwrap();
    let selector = EvenDistribution {
        window: 9,
        min_dist: 8.0,
        max_features: 50,
    };
    let features = selector
        .select(&mut ForstnerScratch::new(), &view, &Window::new(15, 15, 70, 70))
        .unwrap();
    assert!(!features.is_empty());

    let points: Vec<Pt2> = features.iter().map(|f| Pt2::new(f.col as Real, f.row as Real)).collect();
    let img = MaskedImage::unmasked(view);
    let opts = MatchOptions {
        template_size: 11,
        search_size: 21,
        ..MatchOptions::default()
    };
    let set = MatchScratch::new()
        .match_points(&img, &img, &Mat3::identity(), &points, &opts)
        .unwrap();
    assert_eq!(set.matched.len() + set.weak.len() + set.skipped, points.len());
    for m in &set.matched {
        assert!((m.base - m.child).norm() < 0.5);
        // score is the fitted biquadratic peak, slightly below the raw 1.0
        assert!(m.score > 0.95, "score {}", m.score);
    }
}

#[test]
fn subpixel_offsets_stay_below_one_pixel() {
    let mut rng = StdRng::seed_from_u64(21);
    for _ in 0..500 {
        let scores: Vec<Real> = (0..25).map(|_| rng.random::<Real>()).collect();
        let best = scores
            .iter()
            .enumerate()
            .fold((0, Real::MIN), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc })
            .0;
        match subpixel(&scores, 5, 5, best / 5, best % 5) {
            Ok(fit) => assert!(fit.dc.abs() < 1.0 && fit.dr.abs() < 1.0),
            Err(err) => assert!(matches!(err, LmkError::NumericalDegeneracy(_))),
        }
    }
}
