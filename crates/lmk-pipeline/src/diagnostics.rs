//! Grayscale PNG overlays for inspecting a run.
//!
//! These images are never needed for correctness; callers log and ignore
//! write errors.

use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use lmk_core::{Mat3, Pt2, RasterView};
use lmk_features::warp_raster;

const CROSS_HALF: i64 = 3;
const ACCEPTED: Luma<u8> = Luma([255]);
const REJECTED: Luma<u8> = Luma([0]);

fn to_image(view: &RasterView<'_, u8>) -> Result<GrayImage> {
    GrayImage::from_raw(view.cols() as u32, view.rows() as u32, view.data().to_vec())
        .context("raster does not fit an image buffer")
}

fn draw_cross(img: &mut GrayImage, p: &Pt2, color: Luma<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let (cx, cy) = (p.x.round() as i64, p.y.round() as i64);
    for d in -CROSS_HALF..=CROSS_HALF {
        for (x, y) in [(cx + d, cy), (cx, cy + d)] {
            if x >= 0 && y >= 0 && x < w && y < h {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// `image` with white crosses on `accepted` and black crosses on `rejected`.
pub fn feature_overlay(image: &RasterView<'_, u8>, accepted: &[Pt2], rejected: &[Pt2]) -> Result<GrayImage> {
    let mut img = to_image(image)?;
    for p in rejected {
        draw_cross(&mut img, p, REJECTED);
    }
    for p in accepted {
        draw_cross(&mut img, p, ACCEPTED);
    }
    Ok(img)
}

pub fn write_feature_overlay(path: &Path, image: &RasterView<'_, u8>, accepted: &[Pt2], rejected: &[Pt2]) -> Result<()> {
    feature_overlay(image, accepted, rejected)?
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// `source` resampled into a `cols x rows` frame, where `h` maps frame
/// pixels to source pixels.
pub fn write_warped(path: &Path, source: &RasterView<'_, u8>, h: &Mat3, cols: usize, rows: usize) -> Result<()> {
    let inv = lmk_core::invert_homography(h).context("homography is singular")?;
    let warped = warp_raster(source, &inv, cols, rows)?;
    to_image(&warped.view())?
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
