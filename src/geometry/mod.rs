use nalgebra::Vector2;

/// Generate a grid of sample points that are evenly distributed across the image
///
/// Pixel centres follow the camera convention where the image spans
/// `[-0.5, size - 0.5]` on each axis.
///
/// # Arguments
///
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
/// * `n` - The approximate number of points to generate
///
/// # Returns
///
/// A vector of 2D points representing pixel coordinates
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Vector2<f64>> {
    let mut points = Vec::new();

    // Calculate the number of cells in each dimension
    let num_cells_x = (n as f64 * (width / height)).sqrt().round().max(1.0) as usize;
    let num_cells_y = (n as f64 * (height / width)).sqrt().round().max(1.0) as usize;

    // Calculate the dimensions of each cell
    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    // Generate a point at the center of each cell
    for i in 0..num_cells_y {
        for j in 0..num_cells_x {
            let x = (j as f64 + 0.5) * cell_width - 0.5;
            let y = (i as f64 + 0.5) * cell_height - 0.5;
            points.push(Vector2::new(x, y));
        }
    }

    points
}
