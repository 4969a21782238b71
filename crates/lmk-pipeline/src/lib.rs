//! Landmark registration and comparison pipelines.
//!
//! - [`config`]: JSON run parameters with defaults and validation.
//! - [`registration`]: the staged child-onto-base registration.
//! - [`comparison`]: dense displacement between landmarks or images.
//! - [`diagnostics`]: overlay images for inspection.

pub mod comparison;
pub mod config;
pub mod diagnostics;
pub mod registration;

pub use comparison::{compare_images, compare_landmarks, write_results, Comparison, NoDataCaps};
pub use config::Parameters;
pub use registration::{register_files, registered_path, Registration, RegistrationStage, RegistrationState};
