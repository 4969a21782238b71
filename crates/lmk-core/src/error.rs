//! Error type shared by the library crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmkError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("could not allocate scratch buffer of {0} elements")]
    AllocationFailure(usize),
    #[error("need at least {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(&'static str),
    #[error("coordinate ({x:.2}, {y:.2}) is outside the raster")]
    BoundaryViolation { x: f64, y: f64 },
    #[error("consensus failed: {inliers} inliers, {required} required")]
    ConsensusFailure { inliers: usize, required: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed landmark file: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, LmkError>;

/// Grow `buf` to hold `len` elements, reporting allocation failure instead of aborting.
pub fn try_resize<T: Clone>(buf: &mut Vec<T>, len: usize, fill: T) -> Result<()> {
    if len > buf.len() {
        buf.try_reserve(len - buf.len())
            .map_err(|_| LmkError::AllocationFailure(len))?;
    }
    buf.clear();
    buf.resize(len, fill);
    Ok(())
}
