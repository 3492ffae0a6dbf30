//! Camera model types shared by the ATAN (FOV) camera implementation.
//!
//! The intrinsic parameters of the model are stored *normalized* by the image
//! size (see [`CameraParameters`]), so the same vector stays valid across image
//! resolutions. Pixel-space quantities such as [`Intrinsics`] are always derived.

use nalgebra::{SVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod atan;
pub mod derived;
pub mod distortion;

pub use atan::{AtanCamera, ProjectionRecord, ProjectionSpace};
pub use derived::{DerivedState, LinearMapping};
pub use distortion::FovDistortion;

/// Number of intrinsic parameters of the ATAN camera: `fx_n, fy_n, cx_n, cy_n, w`.
pub const NUM_CAMERA_PARAMETERS: usize = 5;

/// Raw parameter vector in the order `[fx_n, fy_n, cx_n, cy_n, w]`.
pub type ParameterVector = SVector<f64, NUM_CAMERA_PARAMETERS>;

/// Pixel-space intrinsic parameters (focal lengths and principal point).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Integer image resolution as stored in calibration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Image size in pixels. Fractional sizes are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub fn new(width: f64, height: f64) -> Self {
        ImageSize { width, height }
    }

    pub fn as_vector(&self) -> Vector2<f64> {
        Vector2::new(self.width, self.height)
    }
}

impl From<Resolution> for ImageSize {
    fn from(resolution: Resolution) -> Self {
        ImageSize::new(resolution.width as f64, resolution.height as f64)
    }
}

/// The five intrinsic parameters of the ATAN camera, normalized by image size.
///
/// * `fx`, `fy` - focal length divided by image width / height.
/// * `cx`, `cy` - principal point divided by image width / height.
/// * `w` - FOV distortion angle in radians. `0.0` disables distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
}

impl CameraParameters {
    /// Parameters used when a store has no entry for a camera: at 5 m in front
    /// of the camera the frustum section is roughly 10 m x 10 m.
    pub const DEFAULT: CameraParameters = CameraParameters {
        fx: 0.5,
        fy: 0.8,
        cx: 0.5,
        cy: 0.5,
        w: 0.07,
    };

    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, w: f64) -> Self {
        CameraParameters { fx, fy, cx, cy, w }
    }

    pub fn from_vector(vector: &ParameterVector) -> Self {
        CameraParameters {
            fx: vector[0],
            fy: vector[1],
            cx: vector[2],
            cy: vector[3],
            w: vector[4],
        }
    }

    pub fn to_vector(&self) -> ParameterVector {
        ParameterVector::new(self.fx, self.fy, self.cx, self.cy, self.w)
    }

    /// Builds parameters from a slice such as a YAML sequence.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::InvalidParams`] if the slice does not hold exactly
    /// [`NUM_CAMERA_PARAMETERS`] values.
    pub fn from_slice(values: &[f64]) -> Result<Self, CameraModelError> {
        if values.len() != NUM_CAMERA_PARAMETERS {
            return Err(CameraModelError::InvalidParams(format!(
                "expected {} camera parameters, got {}",
                NUM_CAMERA_PARAMETERS,
                values.len()
            )));
        }
        Ok(CameraParameters::new(
            values[0], values[1], values[2], values[3], values[4],
        ))
    }

    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.fx, self.fy, self.cx, self.cy, self.w]
    }

    /// Returns `self + update`, element-wise.
    pub fn updated(&self, update: &ParameterVector) -> Self {
        CameraParameters::from_vector(&(self.to_vector() + update))
    }
}

impl Default for CameraParameters {
    fn default() -> Self {
        CameraParameters::DEFAULT
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Image size must be positive")]
    ImageSizeMustBePositive,
    #[error("No projection has been performed yet")]
    NoProjectionPerformed,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the core functionality for camera models that work on
/// camera-frame 3D points.
pub trait CameraModel {
    /// Project a 3D point to 2D image coordinates
    fn project_point(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject 2D image coordinates to a unit-length 3D ray
    fn unproject_point(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_distortion(&self) -> Vec<f64>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_image_size(size: &ImageSize) -> Result<(), CameraModelError> {
        if !(size.width > 0.0 && size.height > 0.0) {
            return Err(CameraModelError::ImageSizeMustBePositive);
        }
        Ok(())
    }

    pub fn validate_distortion_angle(w: f64) -> Result<(), CameraModelError> {
        if !w.is_finite() {
            return Err(CameraModelError::InvalidParams(
                "w must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
