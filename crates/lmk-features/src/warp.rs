//! Resampling a byte raster through a homography.

use lmk_core::{invert_homography, sample, transfer, LmkError, Mat3, Pt2, Raster, RasterView, Real, Result};

/// Warp `src` into a `cols x rows` frame, where `h` maps source pixels to
/// destination pixels. Cells that fall outside the source are 0.
pub fn warp_raster(src: &RasterView<'_, u8>, h: &Mat3, cols: usize, rows: usize) -> Result<Raster<u8>> {
    let inv = invert_homography(h).ok_or(LmkError::NumericalDegeneracy("singular warp homography"))?;
    let mut out = Raster::filled(cols, rows, 0u8);
    for y in 0..rows {
        for x in 0..cols {
            let p = transfer(&inv, &Pt2::new(x as Real, y as Real));
            if let Some(v) = sample(src, p.x, p.y) {
                out.set(x, y, v);
            }
        }
    }
    Ok(out)
}
