//! Bilinear sampling generic over the raster element type.
//!
//! Rules, in order:
//! - the rounded coordinate must lie inside the raster, otherwise `None`;
//! - an exactly integral coordinate returns the cell value untouched;
//! - along an axis where the 2x2 neighbourhood would leave the raster the
//!   coordinate snaps to its rounded value;
//! - any no-data neighbour (NaN for floats) yields `None`.

use crate::math::Real;
use crate::raster::RasterView;

/// Numeric cell type that can be sampled.
pub trait RasterElement: Copy {
    fn to_real(self) -> Real;
    fn from_real(v: Real) -> Self;
    fn is_no_data(self) -> bool {
        false
    }
}

impl RasterElement for u8 {
    fn to_real(self) -> Real {
        self as Real
    }
    fn from_real(v: Real) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl RasterElement for u16 {
    fn to_real(self) -> Real {
        self as Real
    }
    fn from_real(v: Real) -> Self {
        v.round().clamp(0.0, u16::MAX as Real) as u16
    }
}

impl RasterElement for f32 {
    fn to_real(self) -> Real {
        self as Real
    }
    fn from_real(v: Real) -> Self {
        v as f32
    }
    fn is_no_data(self) -> bool {
        self.is_nan()
    }
}

impl RasterElement for f64 {
    fn to_real(self) -> Real {
        self
    }
    fn from_real(v: Real) -> Self {
        v
    }
    fn is_no_data(self) -> bool {
        self.is_nan()
    }
}

fn axis(v: Real, len: usize) -> Option<(usize, usize, Real)> {
    let r = v.round();
    if !(r >= 0.0 && r < len as Real) {
        return None;
    }
    if v < 0.0 || v > (len - 1) as Real {
        let i = r as usize;
        return Some((i, i, 0.0));
    }
    let i0 = v.floor() as usize;
    let i1 = (i0 + 1).min(len - 1);
    Some((i0, i1, v - i0 as Real))
}

/// Interpolated value at fractional `(x, y)` = `(col, row)`.
pub fn bilinear<T: RasterElement>(raster: &RasterView<'_, T>, x: Real, y: Real) -> Option<Real> {
    let (x0, x1, fx) = axis(x, raster.cols())?;
    let (y0, y1, fy) = axis(y, raster.rows())?;

    if fx == 0.0 && fy == 0.0 {
        let v = raster.at(x0, y0);
        return (!v.is_no_data()).then(|| v.to_real());
    }

    let v00 = raster.at(x0, y0);
    let v10 = raster.at(x1, y0);
    let v01 = raster.at(x0, y1);
    let v11 = raster.at(x1, y1);
    if v00.is_no_data() || v10.is_no_data() || v01.is_no_data() || v11.is_no_data() {
        return None;
    }

    let top = v00.to_real() * (1.0 - fx) + v10.to_real() * fx;
    let bottom = v01.to_real() * (1.0 - fx) + v11.to_real() * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Like [`bilinear`] but converted back to the cell type (bytes are rounded).
pub fn sample<T: RasterElement>(raster: &RasterView<'_, T>, x: Real, y: Real) -> Option<T> {
    bilinear(raster, x, y).map(T::from_real)
}
