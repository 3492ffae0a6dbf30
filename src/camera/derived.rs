//! Quantities derived from the normalized parameters and the image size.
//!
//! [`DerivedState::compute`] is a pure function of its two inputs. The camera
//! keeps one instance and replaces it wholesale whenever the parameters or the
//! image size change.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::camera::atan::{ProjectionRecord, ProjectionSpace};
use crate::camera::distortion::FovDistortion;
use crate::camera::{CameraParameters, ImageSize};

/// Half-pixel shift applied to the principal point. Border pixels of both axes
/// end up symmetric about the image edges, which rendering code relies on.
pub const PIXEL_CENTER_OFFSET: f64 = 0.5;

/// Ratio between the validity radius and the undistorted radius of the image
/// corner farthest from the principal point.
pub const MAX_RADIUS_SCALE: f64 = 1.5;

/// Affine map `out = center + focal ⊙ in` between the distorted Euclidean
/// plane and an output space (pixels or device coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearMapping {
    pub focal: Vector2<f64>,
    pub center: Vector2<f64>,
    pub inv_focal: Vector2<f64>,
}

impl LinearMapping {
    pub fn new(focal: Vector2<f64>, center: Vector2<f64>) -> Self {
        LinearMapping {
            focal,
            center,
            inv_focal: Vector2::new(1.0 / focal.x, 1.0 / focal.y),
        }
    }

    pub fn apply(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        self.center + self.focal.component_mul(distorted)
    }

    pub fn invert(&self, point: &Vector2<f64>) -> Vector2<f64> {
        (point - self.center).component_mul(&self.inv_focal)
    }
}

/// Everything the projection functions need beyond the raw parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedState {
    /// Pixel-space focal length and principal point.
    pub pixel: LinearMapping,
    /// The normalized parameters used directly, for device (UFB) coordinates.
    pub device: LinearMapping,
    pub distortion: FovDistortion,
    /// Undistorted radius of the image corner farthest from the principal point.
    pub largest_radius: f64,
    /// Radius beyond which the model extrapolates.
    pub max_radius: f64,
    /// Approximate size of one pixel on the normalized Euclidean plane.
    pub one_pixel_distance: f64,
    /// Minimum corner of the back-projected image bounding box.
    pub image_plane_top_left: Vector2<f64>,
    /// Maximum corner of the back-projected image bounding box.
    pub image_plane_bottom_right: Vector2<f64>,
    /// Linear map taking the back-projected image bounding box onto `[0, 1]²`.
    pub ufb_linear: LinearMapping,
}

impl DerivedState {
    /// Computes the derived state. Degenerate inputs (zero focal length, zero
    /// image size) are not rejected and produce infinities or NaNs.
    pub fn compute(params: &CameraParameters, image_size: &ImageSize) -> Self {
        let size = image_size.as_vector();

        let pixel = LinearMapping::new(
            Vector2::new(size.x * params.fx, size.y * params.fy),
            Vector2::new(
                size.x * params.cx - PIXEL_CENTER_OFFSET,
                size.y * params.cy - PIXEL_CENTER_OFFSET,
            ),
        );
        let device = LinearMapping::new(
            Vector2::new(params.fx, params.fy),
            Vector2::new(params.cx, params.cy),
        );
        let distortion = FovDistortion::new(params.w);

        // The farthest corner is found in [0, 1]² image space, since the
        // parameters are already normalized by the image size.
        let corner = Vector2::new(
            params.cx.max(1.0 - params.cx) / params.fx,
            params.cy.max(1.0 - params.cy) / params.fy,
        );
        let largest_radius = distortion.undistorted_radius(corner.norm());
        let max_radius = MAX_RADIUS_SCALE * largest_radius;

        let unproject = |point: Vector2<f64>| {
            ProjectionRecord::inverse(
                &pixel,
                &distortion,
                max_radius,
                ProjectionSpace::Pixel,
                &point,
            )
            .euclidean
        };

        let half_size = 0.5 * size;
        let center_point = unproject(half_size);
        let diagonal_point = unproject(half_size + Vector2::new(1.0, 1.0));
        let one_pixel_distance = (center_point - diagonal_point).norm() / 2.0_f64.sqrt();

        let low = -PIXEL_CENTER_OFFSET;
        let corners = [
            unproject(Vector2::new(low, low)),
            unproject(Vector2::new(size.x + low, low)),
            unproject(Vector2::new(size.x + low, size.y + low)),
            unproject(Vector2::new(low, size.y + low)),
        ];
        let mut top_left = corners[0];
        let mut bottom_right = corners[0];
        for corner in &corners[1..] {
            top_left = top_left.inf(corner);
            bottom_right = bottom_right.sup(corner);
        }

        let range = bottom_right - top_left;
        let ufb_focal = Vector2::new(1.0 / range.x, 1.0 / range.y);
        let ufb_linear = LinearMapping {
            focal: ufb_focal,
            center: -top_left.component_mul(&ufb_focal),
            inv_focal: range,
        };

        DerivedState {
            pixel,
            device,
            distortion,
            largest_radius,
            max_radius,
            one_pixel_distance,
            image_plane_top_left: top_left,
            image_plane_bottom_right: bottom_right,
            ufb_linear,
        }
    }
}
