//! Linear solvers for landmark registration.
//!
//! - [`HomographySolver`]: direct, centered and RANSAC homographies between
//!   raster frames, plus the corner-induced homography between landmarks;
//! - [`RigidSolver`]: closed-form and RANSAC rigid alignment of 3D point sets.

pub mod math;

mod homography;
mod rigid;

pub use homography::*;
pub use rigid::*;
