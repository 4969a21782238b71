//! Georeferenced raster tile: reflectance + elevation over a local tangent plane.
//!
//! Three frames are involved:
//! - pixel `(col, row)`, row growing southwards;
//! - map `(x, y, z)`: east, north, up on the tangent plane through the
//!   anchor point, in meters. Elevations are map `z`;
//! - world: planet body-fixed coordinates.
//!
//! `world_to_map` rotates world vectors into the map frame; the map plane
//! normal in world coordinates is its third row.

mod io;
mod resample;

pub use io::{sidecar_path, LandmarkHeader};

use crate::datum::Planet;
use crate::error::{try_resize, LmkError, Result};
use crate::interpolate::{bilinear, sample};
use crate::math::{Mat2x3, Mat3, Pt2, Real, Vec2, Vec3};
use crate::raster::RasterView;

/// Maximum length in bytes of a landmark identifier.
pub const LANDMARK_ID_LEN: usize = 32;
/// Reflectance value of cells without a surface model.
pub const NO_SURFACE_REFLECTANCE: u8 = 100;

const SURFACE_MAX_ITERS: usize = 100;
const SURFACE_BORDER: Real = 2.0;

#[derive(Debug, Clone)]
pub struct Landmark {
    id: String,
    planet: Planet,
    num_cols: usize,
    num_rows: usize,
    resolution: Real,
    anchor_col: Real,
    anchor_row: Real,
    anchor_point: Vec3,
    world_to_map: Mat3,
    map_to_world: Mat3,
    srm: Vec<u8>,
    ele: Vec<f32>,
    pixel_to_map: Mat2x3,
    map_to_pixel: Mat2x3,
    normal: Vec3,
    plane: [Real; 4],
}

fn check_rotation(r: &Mat3) -> Result<()> {
    if (r * r.transpose() - Mat3::identity()).norm() > 1e-6 || r.determinant() < 0.0 {
        return Err(LmkError::InvalidParameter(
            "landmark rotation is not orthonormal".into(),
        ));
    }
    Ok(())
}

impl Landmark {
    /// Allocate a landmark whose tangent plane touches the surface at the
    /// given geodetic anchor. The anchor pixel is the raster center, every
    /// elevation is NaN and every reflectance is [`NO_SURFACE_REFLECTANCE`].
    #[allow(clippy::too_many_arguments)]
    pub fn from_geodetic(
        planet: Planet,
        id: &str,
        num_cols: usize,
        num_rows: usize,
        resolution: Real,
        lat_deg: Real,
        long_deg: Real,
        anchor_ele: Real,
    ) -> Result<Self> {
        let ellipsoid = planet.ellipsoid();
        let anchor_point = ellipsoid.geodetic_to_body(lat_deg, long_deg, anchor_ele);
        let world_to_map = ellipsoid.local_frame(lat_deg, long_deg, anchor_ele);
        Self::with_frame(
            planet,
            id,
            num_cols,
            num_rows,
            resolution,
            Pt2::new((num_cols / 2) as Real, (num_rows / 2) as Real),
            anchor_point,
            world_to_map,
        )
    }

    /// Allocate a landmark with an explicit frame.
    #[allow(clippy::too_many_arguments)]
    pub fn with_frame(
        planet: Planet,
        id: &str,
        num_cols: usize,
        num_rows: usize,
        resolution: Real,
        anchor_pixel: Pt2,
        anchor_point: Vec3,
        world_to_map: Mat3,
    ) -> Result<Self> {
        if num_cols == 0 || num_rows == 0 {
            return Err(LmkError::InvalidParameter(format!(
                "landmark size must be positive, got {num_cols}x{num_rows}"
            )));
        }
        if !(resolution > 0.0 && resolution.is_finite()) {
            return Err(LmkError::InvalidParameter(format!(
                "landmark resolution must be positive, got {resolution}"
            )));
        }
        if id.len() > LANDMARK_ID_LEN {
            return Err(LmkError::InvalidParameter(format!(
                "landmark id longer than {LANDMARK_ID_LEN} bytes"
            )));
        }
        check_rotation(&world_to_map)?;

        let n = num_cols * num_rows;
        let mut srm = Vec::new();
        let mut ele = Vec::new();
        try_resize(&mut srm, n, NO_SURFACE_REFLECTANCE)?;
        try_resize(&mut ele, n, f32::NAN)?;

        let mut lmk = Self {
            id: id.to_owned(),
            planet,
            num_cols,
            num_rows,
            resolution,
            anchor_col: anchor_pixel.x,
            anchor_row: anchor_pixel.y,
            anchor_point,
            world_to_map,
            map_to_world: world_to_map.transpose(),
            srm,
            ele,
            pixel_to_map: Mat2x3::zeros(),
            map_to_pixel: Mat2x3::zeros(),
            normal: Vec3::z(),
            plane: [0.0; 4],
        };
        lmk.update_derived();
        Ok(lmk)
    }

    fn update_derived(&mut self) {
        let res = self.resolution;
        self.map_to_world = self.world_to_map.transpose();
        self.pixel_to_map = Mat2x3::new(
            res,
            0.0,
            -res * self.anchor_col,
            0.0,
            -res,
            res * self.anchor_row,
        );
        self.map_to_pixel = Mat2x3::new(
            1.0 / res,
            0.0,
            self.anchor_col,
            0.0,
            -1.0 / res,
            self.anchor_row,
        );
        self.normal = self.map_to_world.column(2).into_owned();
        let d = -self.normal.dot(&self.anchor_point);
        self.plane = [self.normal.x, self.normal.y, self.normal.z, d];
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: &str) -> Result<()> {
        if id.len() > LANDMARK_ID_LEN {
            return Err(LmkError::InvalidParameter(format!(
                "landmark id longer than {LANDMARK_ID_LEN} bytes"
            )));
        }
        self.id = id.to_owned();
        Ok(())
    }

    pub fn planet(&self) -> Planet {
        self.planet
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_pixels(&self) -> usize {
        self.num_cols * self.num_rows
    }

    pub fn resolution(&self) -> Real {
        self.resolution
    }

    pub fn anchor_pixel(&self) -> Pt2 {
        Pt2::new(self.anchor_col, self.anchor_row)
    }

    pub fn anchor_point(&self) -> &Vec3 {
        &self.anchor_point
    }

    pub fn world_to_map(&self) -> &Mat3 {
        &self.world_to_map
    }

    pub fn map_to_world(&self) -> &Mat3 {
        &self.map_to_world
    }

    /// Map plane unit normal, world frame.
    pub fn normal(&self) -> &Vec3 {
        &self.normal
    }

    /// Plane `[a, b, c, d]` with `a x + b y + c z + d = 0` through the anchor.
    pub fn plane(&self) -> [Real; 4] {
        self.plane
    }

    pub fn pixel_to_map(&self) -> &Mat2x3 {
        &self.pixel_to_map
    }

    pub fn map_to_pixel(&self) -> &Mat2x3 {
        &self.map_to_pixel
    }

    pub fn srm(&self) -> &[u8] {
        &self.srm
    }

    pub fn srm_mut(&mut self) -> &mut [u8] {
        &mut self.srm
    }

    pub fn ele(&self) -> &[f32] {
        &self.ele
    }

    pub fn ele_mut(&mut self) -> &mut [f32] {
        &mut self.ele
    }

    pub fn srm_view(&self) -> RasterView<'_, u8> {
        RasterView::from_parts(&self.srm, self.num_cols, self.num_rows)
    }

    pub fn ele_view(&self) -> RasterView<'_, f32> {
        RasterView::from_parts(&self.ele, self.num_cols, self.num_rows)
    }

    /// Byte mask with 1 where the elevation is missing.
    pub fn no_data_mask(&self) -> Vec<u8> {
        self.ele.iter().map(|e| u8::from(e.is_nan())).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Coordinate transforms
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pixel_to_map_xy(&self, col: Real, row: Real) -> Vec2 {
        self.pixel_to_map * Vec3::new(col, row, 1.0)
    }

    pub fn map_xy_to_pixel(&self, x: Real, y: Real) -> Pt2 {
        let v = self.map_to_pixel * Vec3::new(x, y, 1.0);
        Pt2::new(v.x, v.y)
    }

    /// World position of a pixel at a given elevation above the map plane.
    pub fn col_row_ele_to_world(&self, col: Real, row: Real, ele: Real) -> Vec3 {
        let xy = self.pixel_to_map_xy(col, row);
        self.map_to_world * Vec3::new(xy.x, xy.y, ele) + self.anchor_point
    }

    /// World position of a pixel on the elevation surface. `None` where the
    /// surface has no data.
    pub fn col_row_to_world(&self, col: Real, row: Real) -> Option<Vec3> {
        let ele = self.interpolate_ele(col, row)?;
        Some(self.col_row_ele_to_world(col, row, ele))
    }

    /// `(col, row, ele)` of a world point.
    pub fn world_to_col_row_ele(&self, p: &Vec3) -> Vec3 {
        let m = self.world_to_map * (p - self.anchor_point);
        let px = self.map_xy_to_pixel(m.x, m.y);
        Vec3::new(px.x, px.y, m.z)
    }

    pub fn interpolate_ele(&self, col: Real, row: Real) -> Option<Real> {
        bilinear(&self.ele_view(), col, row)
    }

    pub fn interpolate_srm(&self, col: Real, row: Real) -> Option<u8> {
        sample(&self.srm_view(), col, row)
    }

    pub fn contains(&self, col: Real, row: Real) -> bool {
        col >= 0.0
            && row >= 0.0
            && col <= (self.num_cols - 1) as Real
            && row <= (self.num_rows - 1) as Real
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ray intersection
    // ─────────────────────────────────────────────────────────────────────────

    /// Intersection of the ray `origin + s * ray` with the map plane.
    pub fn intersect_plane(&self, origin: &Vec3, ray: &Vec3) -> Result<Vec3> {
        let rn = ray.dot(&self.normal);
        if rn == 0.0 {
            return Err(LmkError::NumericalDegeneracy("ray is parallel to the map plane"));
        }
        let s = (-self.plane[3] - origin.dot(&self.normal)) / rn;
        Ok(origin + ray * s)
    }

    /// Intersection of a ray with the elevation surface.
    ///
    /// Starts on the map plane and repeatedly slides along the ray by the
    /// difference between the surface elevation under the current point
    /// and the point's own height, until that difference drops below
    /// `tolerance`. Fails when the projected point comes within two pixels
    /// of the border, when the surface has no data there, or after 100
    /// iterations.
    pub fn intersect_surface(&self, origin: &Vec3, ray: &Vec3, tolerance: Real) -> Result<Vec3> {
        let rn = ray.dot(&self.normal);
        let mut p = self.intersect_plane(origin, ray)?;
        let max_col = self.num_cols as Real - SURFACE_BORDER;
        let max_row = self.num_rows as Real - SURFACE_BORDER;

        for _ in 0..SURFACE_MAX_ITERS {
            let crh = self.world_to_col_row_ele(&p);
            if crh.x < SURFACE_BORDER || crh.x > max_col || crh.y < SURFACE_BORDER || crh.y > max_row
            {
                return Err(LmkError::BoundaryViolation { x: crh.x, y: crh.y });
            }
            let surface = self
                .interpolate_ele(crh.x, crh.y)
                .ok_or(LmkError::NumericalDegeneracy("no elevation under the ray"))?;
            let dh = surface - crh.z;
            if dh.abs() < tolerance {
                return Ok(p);
            }
            p += ray * (dh / rn);
        }
        Err(LmkError::NumericalDegeneracy(
            "surface intersection did not converge",
        ))
    }

    /// Intersection of a grazing ray with the elevation surface.
    ///
    /// The ray is clipped between the planes at heights `max_ele` (capped at
    /// the origin's own height) and `min_ele`, then marched at half-pixel
    /// steps over at most `max_range` meters of ground track. At the first
    /// step where the surface rises above the ray, a local plane is fitted
    /// through the four half-pixel neighbours and intersected with the ray.
    pub fn intersect_surface_low_slant(
        &self,
        origin: &Vec3,
        ray: &Vec3,
        min_ele: Real,
        max_ele: Real,
        max_range: Real,
    ) -> Result<Vec3> {
        let rn = ray.dot(&self.normal);
        if rn.abs() < 1e-12 {
            return Err(LmkError::NumericalDegeneracy("ray is parallel to the map plane"));
        }
        let o = self.world_to_col_row_ele(origin);
        let max_ele = max_ele.min(o.z);
        if max_ele <= min_ele {
            return Err(LmkError::InvalidParameter(format!(
                "empty elevation band [{min_ele}, {max_ele}]"
            )));
        }
        let a = self.world_to_col_row_ele(&(origin + ray * ((max_ele - o.z) / rn)));
        let b = self.world_to_col_row_ele(&(origin + ray * ((min_ele - o.z) / rn)));
        let d = b - a;

        let full_steps = (2.0 * d.x.abs().max(d.y.abs())).round().max(1.0);
        let cap = (max_range / self.resolution).max(1.0);
        let steps = full_steps.min(cap) as usize;

        let mut prev_dh: Option<Real> = None;
        for k in 0..=steps {
            let c = a + d * (k as Real / full_steps);
            let Some(surface) = self.interpolate_ele(c.x, c.y) else {
                prev_dh = None;
                continue;
            };
            let dh = surface - c.z;
            if matches!(prev_dh, Some(prev) if prev < 0.0) && dh >= 0.0 {
                let hit = self.local_plane_hit(&a, &d, &c, surface);
                return Ok(self.col_row_ele_to_world(hit.x, hit.y, hit.z));
            }
            prev_dh = Some(dh);
        }
        Err(LmkError::NumericalDegeneracy("ray does not reach the surface"))
    }

    fn local_plane_hit(&self, a: &Vec3, d: &Vec3, c: &Vec3, surface: Real) -> Vec3 {
        let neighbours = (
            self.interpolate_ele(c.x - 0.5, c.y),
            self.interpolate_ele(c.x + 0.5, c.y),
            self.interpolate_ele(c.x, c.y - 0.5),
            self.interpolate_ele(c.x, c.y + 0.5),
        );
        let (Some(w), Some(e), Some(n), Some(s)) = neighbours else {
            return Vec3::new(c.x, c.y, surface);
        };
        let gx = e - w;
        let gy = s - n;
        let h0 = 0.25 * (w + e + n + s);
        let denom = d.z - gx * d.x - gy * d.y;
        if denom.abs() < 1e-12 {
            return Vec3::new(c.x, c.y, surface);
        }
        let t = (h0 + gx * (a.x - c.x) + gy * (a.y - c.y) - a.z) / denom;
        a + d * t
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration update
    // ─────────────────────────────────────────────────────────────────────────

    /// Move the landmark by a rigid world transform `p' = R p + t`.
    pub fn apply_rigid(&mut self, rotation: &Mat3, translation: &Vec3) -> Result<()> {
        check_rotation(rotation)?;
        let map_to_world = rotation * self.map_to_world;
        self.world_to_map = map_to_world.transpose();
        self.anchor_point = rotation * self.anchor_point + translation;
        self.update_derived();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    pub(crate) fn flat_landmark(cols: usize, rows: usize, ele: f32) -> Landmark {
        let mut lmk =
            Landmark::from_geodetic(Planet::Moon, "flat", cols, rows, 2.0, 10.0, 20.0, 0.0)
                .unwrap();
        lmk.ele_mut().fill(ele);
        lmk
    }

    #[test]
    fn new_landmark_has_sentinels() {
        let lmk = Landmark::from_geodetic(Planet::Earth, "a", 8, 6, 1.0, 45.0, 7.0, 100.0).unwrap();
        assert_eq!(lmk.num_pixels(), 48);
        assert!(lmk.ele().iter().all(|e| e.is_nan()));
        assert!(lmk.srm().iter().all(|&s| s == NO_SURFACE_REFLECTANCE));
        assert_eq!(lmk.anchor_pixel(), Pt2::new(4.0, 3.0));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(Landmark::from_geodetic(Planet::Mars, "a", 0, 6, 1.0, 0.0, 0.0, 0.0).is_err());
        assert!(Landmark::from_geodetic(Planet::Mars, "a", 6, 6, 0.0, 0.0, 0.0, 0.0).is_err());
        let long_id = "x".repeat(LANDMARK_ID_LEN + 1);
        assert!(Landmark::from_geodetic(Planet::Mars, &long_id, 6, 6, 1.0, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn pixel_map_affines_are_inverse() {
        let lmk = flat_landmark(40, 30, 0.0);
        let xy = lmk.pixel_to_map_xy(7.25, 3.5);
        let px = lmk.map_xy_to_pixel(xy.x, xy.y);
        assert!((px - Pt2::new(7.25, 3.5)).norm() < 1e-12);
        // north is up: a smaller row is further north
        assert!(lmk.pixel_to_map_xy(20.0, 10.0).y > lmk.pixel_to_map_xy(20.0, 11.0).y);
    }

    #[test]
    fn world_round_trip() {
        let lmk = flat_landmark(40, 30, 0.0);
        let w = lmk.col_row_ele_to_world(11.5, 22.25, 37.0);
        let back = lmk.world_to_col_row_ele(&w);
        assert!((back - Vec3::new(11.5, 22.25, 37.0)).norm() < 1e-6);
        assert!((lmk.col_row_ele_to_world(20.0, 15.0, 0.0) - lmk.anchor_point()).norm() < 1e-9);
    }

    #[test]
    fn col_row_to_world_requires_elevation() {
        let mut lmk = flat_landmark(10, 10, 5.0);
        assert!(lmk.col_row_to_world(3.0, 3.0).is_some());
        lmk.ele_mut()[3 * 10 + 3] = f32::NAN;
        assert!(lmk.col_row_to_world(3.0, 3.0).is_none());
        assert!(lmk.col_row_to_world(3.5, 2.5).is_none());
    }

    #[test]
    fn plane_contains_anchor() {
        let lmk = flat_landmark(10, 10, 0.0);
        let [a, b, c, d] = lmk.plane();
        let p = lmk.anchor_point();
        assert!((a * p.x + b * p.y + c * p.z + d).abs() < 1e-6);
        assert!((lmk.normal() - lmk.world_to_map().row(2).transpose()).norm() < 1e-12);
    }

    #[test]
    fn parallel_ray_fails() {
        let lmk = flat_landmark(10, 10, 0.0);
        // n.x * n.y cancels exactly, so the dot product is exactly zero
        let n = lmk.normal();
        let ray = Vec3::new(-n.y, n.x, 0.0);
        assert_eq!(ray.dot(&n), 0.0);
        assert!(matches!(
            lmk.intersect_plane(lmk.anchor_point(), &ray),
            Err(LmkError::NumericalDegeneracy(_))
        ));
    }

    #[test]
    fn vertical_ray_hits_surface() {
        let lmk = flat_landmark(50, 50, 12.0);
        let target = lmk.col_row_ele_to_world(20.0, 30.0, 12.0);
        let origin = lmk.col_row_ele_to_world(20.0, 30.0, 1000.0);
        let hit = lmk.intersect_surface(&origin, &(target - origin), 1e-3).unwrap();
        assert!((hit - target).norm() < 1e-2);
    }

    #[test]
    fn oblique_ray_hits_surface() {
        let mut lmk = flat_landmark(60, 60, 0.0);
        // tilted surface: ele = 0.5 * col
        for r in 0..60 {
            for c in 0..60 {
                lmk.ele_mut()[r * 60 + c] = 0.5 * c as f32;
            }
        }
        let target = lmk.col_row_ele_to_world(30.0, 30.0, 15.0);
        let origin = lmk.col_row_ele_to_world(10.0, 25.0, 400.0);
        let hit = lmk.intersect_surface(&origin, &(target - origin), 1e-4).unwrap();
        assert!((hit - target).norm() < 1e-2);
    }

    #[test]
    fn surface_intersection_off_raster_fails() {
        let lmk = flat_landmark(20, 20, 0.0);
        let target = lmk.col_row_ele_to_world(1.0, 10.0, 0.0);
        let origin = lmk.col_row_ele_to_world(1.0, 10.0, 100.0);
        assert!(matches!(
            lmk.intersect_surface(&origin, &(target - origin), 1e-3),
            Err(LmkError::BoundaryViolation { .. })
        ));
    }

    #[test]
    fn grazing_ray_hits_wall() {
        let mut lmk = flat_landmark(80, 20, 0.0);
        // a 40 m step starting at column 50
        for r in 0..20 {
            for c in 50..80 {
                lmk.ele_mut()[r * 80 + c] = 40.0;
            }
        }
        let origin = lmk.col_row_ele_to_world(0.0, 10.0, 30.0);
        let toward = lmk.col_row_ele_to_world(79.0, 10.0, 20.0);
        let hit = lmk
            .intersect_surface_low_slant(&origin, &(toward - origin), -10.0, 100.0, 1000.0)
            .unwrap();
        let crh = lmk.world_to_col_row_ele(&hit);
        assert!(crh.x > 48.5 && crh.x < 50.5, "hit at column {}", crh.x);
        assert!((crh.y - 10.0).abs() < 1e-6);
    }

    #[test]
    fn rigid_update_moves_frame() {
        let mut lmk = flat_landmark(10, 10, 0.0);
        let p = lmk.col_row_ele_to_world(2.0, 3.0, 4.0);
        let r = Rotation3::from_axis_angle(&Vector3::y_axis(), 1e-4).into_inner();
        let t = Vec3::new(3.0, -2.0, 1.0);
        lmk.apply_rigid(&r, &t).unwrap();
        let moved = lmk.col_row_ele_to_world(2.0, 3.0, 4.0);
        assert!((moved - (r * p + t)).norm() < 1e-5);
        let [a, b, c, d] = lmk.plane();
        let q = lmk.anchor_point();
        assert!((a * q.x + b * q.y + c * q.z + d).abs() < 1e-6);
    }
}
