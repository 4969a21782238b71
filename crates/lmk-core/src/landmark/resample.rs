//! Sub-regions and resolution changes.
//!
//! [`Landmark::subset`], [`Landmark::resample`] and [`Landmark::rescale`]
//! keep the parent's tangent plane, so elevations carry over unchanged.
//! [`Landmark::crop_interpolate`] builds a new tangent plane at the region
//! center and re-expresses every cell in it.

use super::{Landmark, NO_SURFACE_REFLECTANCE};
use crate::error::{LmkError, Result};
use crate::math::{Pt2, Real};

impl Landmark {
    fn check_region(&self, left: usize, top: usize, cols: usize, rows: usize) -> Result<()> {
        if cols == 0 || rows == 0 {
            return Err(LmkError::InvalidParameter(format!(
                "empty region {cols}x{rows}"
            )));
        }
        if left + cols > self.num_cols || top + rows > self.num_rows {
            return Err(LmkError::BoundaryViolation {
                x: (left + cols) as Real,
                y: (top + rows) as Real,
            });
        }
        Ok(())
    }

    /// Copy of a rectangular region on the same tangent plane.
    pub fn subset(&self, left: usize, top: usize, cols: usize, rows: usize) -> Result<Landmark> {
        self.check_region(left, top, cols, rows)?;
        let anchor = Pt2::new((cols / 2) as Real, (rows / 2) as Real);
        let anchor_point =
            self.col_row_ele_to_world(left as Real + anchor.x, top as Real + anchor.y, 0.0);
        let mut sub = Landmark::with_frame(
            self.planet,
            &self.id,
            cols,
            rows,
            self.resolution,
            anchor,
            anchor_point,
            self.world_to_map,
        )?;
        for r in 0..rows {
            let src = (top + r) * self.num_cols + left;
            let dst = r * cols;
            sub.srm[dst..dst + cols].copy_from_slice(&self.srm[src..src + cols]);
            sub.ele[dst..dst + cols].copy_from_slice(&self.ele[src..src + cols]);
        }
        Ok(sub)
    }

    /// Resample by `scale` (> 1 coarsens). The new anchor is the raster
    /// center, placed on the parent plane.
    pub fn resample(&self, scale: Real) -> Result<Landmark> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(LmkError::InvalidParameter(format!(
                "resample scale must be positive, got {scale}"
            )));
        }
        let cols = (self.num_cols as Real / scale) as usize;
        let rows = (self.num_rows as Real / scale) as usize;
        let anchor = Pt2::new((cols / 2) as Real, (rows / 2) as Real);
        let anchor_point = self.col_row_ele_to_world(anchor.x * scale, anchor.y * scale, 0.0);
        let mut out = Landmark::with_frame(
            self.planet,
            &self.id,
            cols,
            rows,
            self.resolution * scale,
            anchor,
            anchor_point,
            self.world_to_map,
        )?;
        for i in 0..rows {
            for j in 0..cols {
                let (x, y) = (j as Real * scale, i as Real * scale);
                let k = i * cols + j;
                out.ele[k] = self.interpolate_ele(x, y).map_or(f32::NAN, |e| e as f32);
                out.srm[k] = self.interpolate_srm(x, y).unwrap_or(NO_SURFACE_REFLECTANCE);
            }
        }
        Ok(out)
    }

    /// Resample to a target resolution in meters per pixel.
    pub fn rescale(&self, resolution: Real) -> Result<Landmark> {
        self.resample(resolution / self.resolution)
    }

    /// Crop a region onto its own tangent plane.
    ///
    /// The new anchor is the surface point under the region center; every
    /// cell is traced to the parent through world coordinates and its
    /// elevation re-expressed relative to the new plane.
    pub fn crop_interpolate(
        &self,
        left: usize,
        top: usize,
        cols: usize,
        rows: usize,
    ) -> Result<Landmark> {
        self.check_region(left, top, cols, rows)?;
        let cx = left as Real + (cols / 2) as Real;
        let cy = top as Real + (rows / 2) as Real;
        let center_ele = self.interpolate_ele(cx, cy).unwrap_or(0.0);
        let center = self.col_row_ele_to_world(cx, cy, center_ele);
        let (lat, long, height) = self.planet.ellipsoid().body_to_geodetic(&center);

        let mut out = Landmark::from_geodetic(
            self.planet,
            &self.id,
            cols,
            rows,
            self.resolution,
            lat,
            long,
            height,
        )?;
        for i in 0..rows {
            for j in 0..cols {
                let w = out.col_row_ele_to_world(j as Real, i as Real, 0.0);
                let p = self.world_to_col_row_ele(&w);
                let k = i * cols + j;
                if let Some(ele) = self.interpolate_ele(p.x, p.y) {
                    let surface = self.col_row_ele_to_world(p.x, p.y, ele);
                    out.ele[k] = out.world_to_col_row_ele(&surface).z as f32;
                }
                if let Some(srm) = self.interpolate_srm(p.x, p.y) {
                    out.srm[k] = srm;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::landmark::tests::flat_landmark;
    use crate::landmark::NO_SURFACE_REFLECTANCE;
    use crate::LmkError;

    fn textured(cols: usize, rows: usize) -> crate::Landmark {
        let mut lmk = flat_landmark(cols, rows, 0.0);
        for r in 0..rows {
            for c in 0..cols {
                // stays clear of the no-reflectance marker
                lmk.srm_mut()[r * cols + c] = (101 + (c * 7 + r * 3) % 97) as u8;
                lmk.ele_mut()[r * cols + c] = (c as f32) * 0.25 + r as f32;
            }
        }
        lmk
    }

    #[test]
    fn subset_keeps_world_positions() {
        let lmk = textured(30, 20);
        let sub = lmk.subset(5, 4, 10, 8).unwrap();
        assert_eq!(sub.num_cols(), 10);
        assert_eq!(sub.srm()[0], lmk.srm()[4 * 30 + 5]);
        let a = lmk.col_row_ele_to_world(8.0, 9.0, 3.0);
        let b = sub.col_row_ele_to_world(3.0, 5.0, 3.0);
        assert!((a - b).norm() < 1e-6);
    }

    #[test]
    fn subset_out_of_range_fails() {
        let lmk = textured(30, 20);
        assert!(matches!(
            lmk.subset(25, 0, 10, 5),
            Err(LmkError::BoundaryViolation { .. })
        ));
        assert!(lmk.subset(0, 0, 0, 5).is_err());
    }

    #[test]
    fn resample_halves_size() {
        let lmk = textured(30, 20);
        let half = lmk.resample(2.0).unwrap();
        assert_eq!((half.num_cols(), half.num_rows()), (15, 10));
        assert_eq!(half.resolution(), 4.0);
        // cell (3, 2) samples parent (6, 4)
        assert_eq!(half.ele()[2 * 15 + 3], lmk.ele()[4 * 30 + 6]);
        let a = lmk.col_row_ele_to_world(6.0, 4.0, 0.0);
        let b = half.col_row_ele_to_world(3.0, 2.0, 0.0);
        assert!((a - b).norm() < 1e-6);
    }

    #[test]
    fn rescale_to_resolution() {
        let lmk = textured(30, 20);
        let out = lmk.rescale(3.0).unwrap();
        assert!((out.resolution() - 3.0).abs() < 1e-12);
        assert_eq!(out.num_cols(), 20);
        assert!(lmk.rescale(-1.0).is_err());
    }

    #[test]
    fn crop_interpolate_preserves_surface() {
        let lmk = textured(40, 40);
        let crop = lmk.crop_interpolate(10, 10, 16, 16).unwrap();
        let p = crop.col_row_to_world(8.0, 8.0).unwrap();
        let q = lmk.col_row_to_world(18.0, 18.0).unwrap();
        assert!((p - q).norm() < 0.05, "{}", (p - q).norm());
        assert!(crop.ele()[8 * 16 + 8].abs() < 1e-3);
        assert!(crop.srm().iter().all(|&v| v != NO_SURFACE_REFLECTANCE));
    }
}
