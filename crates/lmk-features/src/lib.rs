//! Feature detection and matching on landmark rasters.
//!
//! - [`forstner`]: Förstner interest operator, best/N-best selection.
//! - [`even_distribution`]: grid-based, spatially even feature selection.
//! - [`correlation`]: NCC template matching with subpixel peak fit.
//! - [`matcher`]: homography-guided matching with no-data masks.
//! - [`dense`]: sliding-block dense displacement fields.
//! - [`warp`]: homography resampling of byte rasters.

pub mod correlation;
pub mod dense;
pub mod even_distribution;
pub mod forstner;
pub mod matcher;
pub mod warp;

pub use correlation::*;
pub use dense::*;
pub use even_distribution::*;
pub use forstner::*;
pub use matcher::*;
pub use warp::*;
