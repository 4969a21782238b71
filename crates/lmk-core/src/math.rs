use nalgebra::{Isometry3, Matrix2x3, Matrix3, Point2, Point3, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Mat2x3 = Matrix2x3<Real>;
pub type Iso3 = Isometry3<Real>;

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Map a pixel through a homography.
pub fn transfer(h: &Mat3, p: &Pt2) -> Pt2 {
    from_homogeneous(&(h * to_homogeneous(p)))
}

/// Scale `h` so that its (2,2) entry is one. Returns `None` for a zero entry.
pub fn normalize_homography(h: &Mat3) -> Option<Mat3> {
    let s = h[(2, 2)];
    if s.abs() <= Real::EPSILON {
        return None;
    }
    Some(h / s)
}

/// Inverse homography, normalized.
pub fn invert_homography(h: &Mat3) -> Option<Mat3> {
    h.try_inverse().and_then(|inv| normalize_homography(&inv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_applies_projective_division() {
        let h = Mat3::new(2.0, 0.0, 1.0, 0.0, 2.0, -1.0, 0.0, 0.0, 2.0);
        let p = transfer(&h, &Pt2::new(1.0, 1.0));
        assert!((p.x - 1.5).abs() < 1e-12);
        assert!((p.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn inverse_round_trips() {
        let h = Mat3::new(1.1, 0.05, 3.0, -0.02, 0.95, -4.0, 1e-4, -2e-4, 1.0);
        let inv = invert_homography(&h).unwrap();
        let p = Pt2::new(12.0, 34.0);
        let q = transfer(&inv, &transfer(&h, &p));
        assert!((p - q).norm() < 1e-9);
        assert!((inv[(2, 2)] - 1.0).abs() < 1e-12);
    }
}
