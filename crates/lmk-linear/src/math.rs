//! Point-set conditioning shared by the solvers.

use lmk_core::{Mat3, Pt2, Real, Vec3};

/// Center 2D points on their centroid.
///
/// Returns the shifted points and the centroid, so that
/// `p_centered = p - centroid`. `None` for an empty input.
pub fn center_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Pt2)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as Real;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let c = Pt2::new(sx / n, sy / n);
    let centered = points.iter().map(|p| Pt2::new(p.x - c.x, p.y - c.y)).collect();
    Some((centered, c))
}

/// Homogeneous translation by `(tx, ty)`.
pub fn translation_2d(tx: Real, ty: Real) -> Mat3 {
    Mat3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0)
}

/// Centroid of 3D points. `None` for an empty input.
pub fn centroid_3d(points: &[Vec3]) -> Option<Vec3> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vec3::zeros(), |acc, p| acc + p);
    Some(sum / points.len() as Real)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centering_moves_mean_to_origin() {
        let pts = vec![Pt2::new(10.0, 2.0), Pt2::new(14.0, 6.0), Pt2::new(12.0, 1.0)];
        let (c, mean) = center_points_2d(&pts).unwrap();
        assert!((mean.x - 12.0).abs() < 1e-12 && (mean.y - 3.0).abs() < 1e-12);
        let s = c.iter().fold((0.0, 0.0), |a, p| (a.0 + p.x, a.1 + p.y));
        assert!(s.0.abs() < 1e-12 && s.1.abs() < 1e-12);
        assert!(center_points_2d(&[]).is_none());
    }
}
