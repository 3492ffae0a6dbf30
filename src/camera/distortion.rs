//! FOV (ATAN) radial distortion of Devernay and Faugeras.
//!
//! The model maps an undistorted radius `ru` on the normalized Euclidean plane
//! to a distorted radius `rd` with a single angle parameter `w`:
//!
//! ```text
//! rd = atan(2 · ru · tan(w/2)) / w
//! ru = tan(rd · w) / (2 · tan(w/2))
//! ```
//!
//! `w == 0` is the plain pinhole case for which both maps are the identity.
//!
//! Close to the centre the ratios `rd / ru` and `ru / rd` are evaluated with
//! their Taylor series, which fills the removable singularity at zero and
//! keeps both maps continuous across [`CENTER_RADIUS_THRESHOLD`].

use serde::{Deserialize, Serialize};

/// Radii at or below this value are treated as the optical centre, where the
/// scale factor `rd / ru` has a removable singularity. Inside it the series
/// truncation error is below `1e-15`.
pub const CENTER_RADIUS_THRESHOLD: f64 = 0.01;

/// Constants of the FOV distortion for one angle `w`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FovDistortion {
    w: f64,
    /// `2 · tan(w/2)`, zero when distortion is disabled.
    two_tan_half_w: f64,
    /// `1 / (2 · tan(w/2))`, zero when distortion is disabled.
    one_over_two_tan: f64,
    /// `1 / w`, zero when distortion is disabled.
    inv_w: f64,
}

impl FovDistortion {
    pub fn new(w: f64) -> Self {
        if w != 0.0 {
            let two_tan_half_w = 2.0 * (w / 2.0).tan();
            FovDistortion {
                w,
                two_tan_half_w,
                one_over_two_tan: 1.0 / two_tan_half_w,
                inv_w: 1.0 / w,
            }
        } else {
            FovDistortion {
                w,
                two_tan_half_w: 0.0,
                one_over_two_tan: 0.0,
                inv_w: 0.0,
            }
        }
    }

    pub fn w(&self) -> f64 {
        self.w
    }

    pub fn two_tan_half_w(&self) -> f64 {
        self.two_tan_half_w
    }

    pub fn one_over_two_tan(&self) -> f64 {
        self.one_over_two_tan
    }

    pub fn inv_w(&self) -> f64 {
        self.inv_w
    }

    pub fn is_enabled(&self) -> bool {
        self.w != 0.0
    }

    /// Distortion scale factor `s(ru) = rd / ru` for an undistorted radius.
    ///
    /// Returns exactly `1.0` for the pinhole case. At the centre it tends to
    /// `2 · tan(w/2) / w`.
    pub fn scale_factor(&self, radius: f64) -> f64 {
        if !self.is_enabled() {
            return 1.0;
        }
        if radius <= CENTER_RADIUS_THRESHOLD {
            // atan(x) / x
            let x2 = (radius * self.two_tan_half_w).powi(2);
            let series = 1.0 - x2 / 3.0 + x2 * x2 / 5.0 - x2 * x2 * x2 / 7.0;
            return self.inv_w * self.two_tan_half_w * series;
        }
        self.inv_w * (radius * self.two_tan_half_w).atan() / radius
    }

    /// Undistorted radius `ru` whose distorted radius is `distorted_radius`.
    pub fn undistorted_radius(&self, distorted_radius: f64) -> f64 {
        if !self.is_enabled() {
            return distorted_radius;
        }
        (distorted_radius * self.w).tan() * self.one_over_two_tan
    }

    /// Factor `ru / rd` that takes a distorted point back to the undistorted
    /// plane, along with the undistorted radius.
    ///
    /// Within [`CENTER_RADIUS_THRESHOLD`] the factor comes from the series of
    /// `tan(y) / y`, so nothing is divided by a near-zero radius.
    pub fn undistortion_factor(&self, distorted_radius: f64) -> (f64, f64) {
        if !self.is_enabled() {
            return (1.0, distorted_radius);
        }
        if distorted_radius <= CENTER_RADIUS_THRESHOLD {
            let y2 = (distorted_radius * self.w).powi(2);
            let series = 1.0 + y2 / 3.0 + 2.0 * y2 * y2 / 15.0 + 17.0 * y2 * y2 * y2 / 315.0;
            let factor = self.w * self.one_over_two_tan * series;
            return (factor, factor * distorted_radius);
        }
        let radius = self.undistorted_radius(distorted_radius);
        (radius / distorted_radius, radius)
    }

    /// Derivative of [`FovDistortion::scale_factor`] with respect to the
    /// radius, divided by the radius. Multiplying it by `x` (or `y`) gives
    /// `∂s/∂x` (or `∂s/∂y`).
    ///
    /// `scale` is the value of `s` at `radius`. Returns zero when distortion
    /// is disabled. Within [`CENTER_RADIUS_THRESHOLD`] the series of
    /// [`FovDistortion::scale_factor`] is differentiated instead.
    pub fn scale_derivative_over_radius(&self, radius: f64, scale: f64) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        let r = radius;
        let k = self.two_tan_half_w;
        if r < CENTER_RADIUS_THRESHOLD {
            let x2 = (k * r).powi(2);
            return self.inv_w * k * k * k * (-2.0 / 3.0 + 4.0 * x2 / 5.0 - 6.0 * x2 * x2 / 7.0);
        }
        (self.inv_w * k / (1.0 + k * k * r * r) - scale) / (r * r)
    }
}
