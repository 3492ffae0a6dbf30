//! ATAN Camera Report
//!
//! Loads an ATAN camera from YAML, prints its derived state and checks the
//! project/unproject round trip over a grid of pixels.
//!
//! Usage:
//! ```bash
//! cargo run --example atan_report -- \
//!   --input-path samples/atan.yaml \
//!   --num-points 500 \
//!   --csv-path output/atan_grid.csv
//! ```

use atan_camera::camera::{AtanCamera, CameraModel};
use atan_camera::util;
use clap::Parser;
use log::{error, info};
use nalgebra::Vector2;
use std::path::PathBuf;

/// ATAN camera report tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the camera YAML file
    #[arg(short = 'i', long)]
    input_path: PathBuf,

    /// Approximate number of grid points
    #[arg(short = 'n', long, default_value_t = 500)]
    num_points: usize,

    /// Optional CSV export of the sampled grid
    #[arg(short = 'c', long)]
    csv_path: Option<PathBuf>,

    /// Near and far planes of the printed frustum matrix
    #[arg(long, num_args = 2, default_values_t = [0.1, 100.0])]
    clip: Vec<f64>,
}

fn write_grid_csv(
    camera: &AtanCamera,
    pixels: &nalgebra::Matrix2xX<f64>,
    euclidean: &nalgebra::Matrix2xX<f64>,
    path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["u", "v", "x", "y", "du_dx", "du_dy", "dv_dx", "dv_dy"])?;
    for (pixel, point) in pixels.column_iter().zip(euclidean.column_iter()) {
        let point = Vector2::new(point[0], point[1]);
        let jacobian = camera.projection_derivs_for(&point);
        writer.write_record(
            [
                pixel[0],
                pixel[1],
                point.x,
                point.y,
                jacobian[(0, 0)],
                jacobian[(0, 1)],
                jacobian[(1, 0)],
                jacobian[(1, 1)],
            ]
            .iter()
            .map(|v| format!("{v:.12}")),
        )?;
    }
    writer.flush()?;
    info!("Exported {} grid points to {}", pixels.ncols(), path.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let input_path = cli
        .input_path
        .to_str()
        .ok_or("input path is not valid UTF-8")?;
    let camera = match AtanCamera::load_from_yaml(input_path) {
        Ok(camera) => camera,
        Err(e) => {
            error!("Failed to load {}: {}", input_path, e);
            return Err(e.into());
        }
    };
    info!("Loaded camera: {:?}", camera);

    println!("Derived state:");
    println!("{}", serde_json::to_string_pretty(camera.derived_state())?);

    let (pixels, euclidean) = util::sample_points(&camera, cli.num_points);
    let error = util::compute_reprojection_error(&camera, &euclidean, &pixels)?;
    println!("Round trip over {} pixels: {:?}", pixels.ncols(), error);

    if let Some(path) = &cli.csv_path {
        write_grid_csv(&camera, &pixels, &euclidean, path)?;
    }

    let (near, far) = (cli.clip[0], cli.clip[1]);
    println!(
        "Frustum matrix (near {near}, far {far}):{}",
        camera.make_frustum_matrix(near, far)
    );

    Ok(())
}
