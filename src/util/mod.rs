use nalgebra::Matrix2xX;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::camera::AtanCamera;
use crate::geometry;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Zero projection points")]
    ZeroProjectionPoints,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Generate a grid of pixels evenly distributed across the camera image along
/// with their back-projections on the normalized Euclidean plane.
///
/// Pixels whose back-projection lies beyond the validity radius are dropped.
///
/// # Returns
///
/// * A tuple containing:
///   * Matrix2xX where each column is a pixel coordinate
///   * Matrix2xX where each column is the corresponding Euclidean point
pub fn sample_points(camera: &AtanCamera, n: usize) -> (Matrix2xX<f64>, Matrix2xX<f64>) {
    let size = camera.image_size();
    let grid = geometry::sample_points(size.width, size.height, n);

    let mut pixels = Vec::with_capacity(grid.len());
    let mut euclidean = Vec::with_capacity(grid.len());
    for pixel in grid {
        let record = camera.unproject_record(&pixel);
        if record.valid {
            pixels.push(pixel);
            euclidean.push(record.euclidean);
        }
    }

    (
        Matrix2xX::from_fn(pixels.len(), |r, c| pixels[c][r]),
        Matrix2xX::from_fn(euclidean.len(), |r, c| euclidean[c][r]),
    )
}

/// Reprojection error statistics, in pixels, of Euclidean points against
/// their observed pixels.
pub fn compute_reprojection_error(
    camera: &AtanCamera,
    euclidean: &Matrix2xX<f64>,
    pixels: &Matrix2xX<f64>,
) -> Result<ProjectionError, UtilError> {
    if euclidean.ncols() != pixels.ncols() {
        return Err(UtilError::InvalidParams(
            "Number of Euclidean points and pixels must match".to_string(),
        ));
    }

    let errors: Vec<f64> = euclidean
        .column_iter()
        .zip(pixels.column_iter())
        .map(|(point, pixel)| {
            let projected = camera.project_record(&point.into_owned()).image;
            (projected - pixel).norm()
        })
        .collect();

    if errors.is_empty() {
        return Err(UtilError::ZeroProjectionPoints);
    }

    // Calculate statistics
    let n = errors.len() as f64;
    let sum: f64 = errors.iter().sum::<f64>();
    let mean = sum / n;

    // Calculate variance and standard deviation
    let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    // Calculate RMSE
    let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
    let rmse = (sum_squared / n).sqrt();

    // Find min and max
    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    // Calculate median
    let mut sorted_errors = errors.clone();
    sorted_errors.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted_errors.len() % 2 == 0 {
        let mid = sorted_errors.len() / 2;
        (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
    } else {
        sorted_errors[sorted_errors.len() / 2]
    };

    Ok(ProjectionError {
        rmse,
        min,
        max,
        mean,
        stddev,
        median,
    })
}
