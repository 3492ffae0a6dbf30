//! ATAN Camera Library
//!
//! A Rust implementation of the FOV ("ATAN") camera model of Devernay and
//! Faugeras used by visual tracking and calibration pipelines. It provides:
//! - Projection between image pixels and the normalized Euclidean plane `z = 1`
//! - The closed-form distortion transform and its exact inverse
//! - The analytic Jacobian of projection and a numerical Jacobian with respect
//!   to the five intrinsic parameters
//! - Device-normalized projection and an off-axis frustum matrix for rendering
//! - Parameter stores keyed by camera name, in memory or in YAML files

pub mod camera;
pub mod geometry;
pub mod store;
pub mod util;

// Re-export commonly used types
pub use camera::{
    AtanCamera, CameraModel, CameraModelError, CameraParameters, DerivedState, FovDistortion,
    ImageSize, Intrinsics, ParameterVector, ProjectionRecord, ProjectionSpace, Resolution,
};

pub use store::{MemoryParameterStore, ParameterStore, YamlParameterStore};
