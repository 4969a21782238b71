//! Core primitives for the landmark registration toolset.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec3`, `Mat3`, ...) and homography helpers,
//! - the shared [`LmkError`] type,
//! - planetary datums and geodetic conversions,
//! - raster views, generic bilinear interpolation and moving-window sums,
//! - the [`Landmark`] model and its file format,
//! - a generic RANSAC engine (`ransac`, [`Estimator`]).

/// Planetary ellipsoids and geodetic conversions.
pub mod datum;
/// Error type shared by the library crates.
pub mod error;
/// Generic bilinear interpolation.
pub mod interpolate;
/// Georeferenced landmark rasters.
pub mod landmark;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Generic RANSAC engine and traits.
pub mod ransac;
/// Borrowed and owned rasters.
pub mod raster;
/// Incremental moving-window sums.
pub mod window_sums;

pub use datum::*;
pub use error::*;
pub use interpolate::*;
pub use landmark::*;
pub use math::*;
pub use ransac::*;
pub use raster::*;
pub use window_sums::*;
