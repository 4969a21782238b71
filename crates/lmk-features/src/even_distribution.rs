//! Spatially even selection of interest points.
//!
//! The region is divided into square cells (starting at the minimum
//! distance, enlarged until there are at most 10 000 cells). Each cell
//! nominates its most interesting pixel; nominees are accepted best first
//! unless they fall within `min_dist / √2` of an accepted point along both
//! axes.

use lmk_core::{RasterView, Real, Result, Window};
use log::debug;

use crate::forstner::{Feature, ForstnerScratch};

const MAX_CELLS: usize = 10_000;

/// Parameters of the even-distribution selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvenDistribution {
    /// Förstner window size (odd).
    pub window: usize,
    /// Minimum spacing between selected points, in pixels.
    pub min_dist: Real,
    /// Upper bound on the number of selected points.
    pub max_features: usize,
}

fn cell_size(width: usize, height: usize, min_dist: Real) -> usize {
    let mut cell = (min_dist as usize).max(1);
    while width * height / (cell * cell) > MAX_CELLS {
        cell += 1;
    }
    cell
}

impl EvenDistribution {
    /// Select evenly spread interest points inside `region`.
    pub fn select(
        &self,
        scratch: &mut ForstnerScratch,
        image: &RasterView<'_, u8>,
        region: &Window,
    ) -> Result<Vec<Feature>> {
        let interest = scratch.interest(image, region, self.window)?;
        let cell = cell_size(region.width, region.height, self.min_dist);
        let grid_cols = region.width.div_ceil(cell);
        let grid_rows = region.height.div_ceil(cell);

        let mut nominees: Vec<Option<Feature>> = vec![None; grid_cols * grid_rows];
        for y in 0..region.height {
            for x in 0..region.width {
                let value = interest.at(x, y);
                if value <= 0.0 {
                    continue;
                }
                let slot = &mut nominees[(y / cell) * grid_cols + x / cell];
                if slot.map_or(true, |f| value < f.value) {
                    *slot = Some(Feature {
                        col: region.left + x,
                        row: region.top + y,
                        value,
                    });
                }
            }
        }
        let mut nominees: Vec<Feature> = nominees.into_iter().flatten().collect();
        nominees.sort_by(|a, b| a.value.total_cmp(&b.value));

        let spacing = (self.min_dist / std::f64::consts::SQRT_2) as i64;
        let mut selected: Vec<Feature> = Vec::with_capacity(self.max_features.min(nominees.len()));
        for f in nominees {
            if selected.len() >= self.max_features {
                break;
            }
            let crowded = selected.iter().any(|s| {
                (s.row as i64 - f.row as i64).abs() < spacing
                    && (s.col as i64 - f.col as i64).abs() < spacing
            });
            if !crowded {
                selected.push(f);
            }
        }
        debug!(
            "even distribution: {} features from {}x{} cells of {} px",
            selected.len(),
            grid_cols,
            grid_rows,
            cell
        );
        Ok(selected)
    }
}
