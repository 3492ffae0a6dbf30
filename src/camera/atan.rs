//! Implements the ATAN (FOV) camera model.
//!
//! [`AtanCamera`] converts between image pixels and the normalized Euclidean
//! plane `z = 1` of a pinhole camera with the single-parameter FOV radial
//! distortion of Devernay and Faugeras ([`FovDistortion`]).
//!
//! The five intrinsics are stored normalized by the image size (see
//! [`CameraParameters`]). Pixel-space values live in a [`DerivedState`] that
//! is recomputed as a whole whenever the parameters or the image size change.
//!
//! Two API styles are offered:
//!
//! * Pure `&self` functions (`project_record`, `unproject_record`,
//!   `projection_derivs_at`, [`camera_parameter_derivs`], ...) that return a
//!   [`ProjectionRecord`] or a Jacobian for an explicit point.
//! * A tracker-style stateful protocol (`project`, `unproject`,
//!   `get_projection_derivs`, `get_camera_parameter_derivs`) where the last
//!   projection is remembered and later queries refer to it. Queries made
//!   before any projection, or after the parameters changed, return
//!   [`CameraModelError::NoProjectionPerformed`].
//!
//! Stateful calls take `&mut self`, so one instance can't be shared between
//! threads without external locking. Use one camera per thread or per track.

use log::{debug, info, warn};
use nalgebra::{Matrix2, Matrix4, SMatrix, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

use crate::camera::derived::{DerivedState, LinearMapping};
use crate::camera::distortion::FovDistortion;
use crate::camera::{
    validation, CameraModel, CameraModelError, CameraParameters, ImageSize, Intrinsics,
    ParameterVector, Resolution, NUM_CAMERA_PARAMETERS,
};
use crate::store::{parameters_key, ParameterStore};

/// Step used by the forward finite differences of [`camera_parameter_derivs`].
pub const PARAMETER_STEP: f64 = 0.001;

/// 2×5 Jacobian of the pixel projection with respect to the intrinsics.
pub type ParameterJacobian = SMatrix<f64, 2, NUM_CAMERA_PARAMETERS>;

/// Output space of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionSpace {
    /// Image pixels.
    Pixel,
    /// Device-normalized (unit frustum box) coordinates that use the
    /// normalized intrinsics directly.
    Device,
}

/// Intermediate results of one projection or unprojection.
///
/// Records produced by either direction share one layout: `factor` is always
/// the forward distortion scale `distorted_radius / radius`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    /// Undistorted point on the normalized Euclidean plane.
    pub euclidean: Vector2<f64>,
    /// Point after applying the radial distortion.
    pub distorted: Vector2<f64>,
    /// Point in the output space (pixels or device coordinates).
    pub image: Vector2<f64>,
    /// Undistorted radius.
    pub radius: f64,
    pub distorted_radius: f64,
    /// Distortion scale factor.
    pub factor: f64,
    /// `false` when the undistorted radius exceeds the validity radius. The
    /// numeric result is still returned.
    pub valid: bool,
    pub space: ProjectionSpace,
}

impl ProjectionRecord {
    /// Projects a Euclidean point through `distortion` and `mapping`.
    pub fn forward(
        mapping: &LinearMapping,
        distortion: &FovDistortion,
        max_radius: f64,
        space: ProjectionSpace,
        euclidean: &Vector2<f64>,
    ) -> Self {
        let radius = euclidean.norm();
        let factor = distortion.scale_factor(radius);
        let distorted = euclidean * factor;
        ProjectionRecord {
            euclidean: *euclidean,
            distorted,
            image: mapping.apply(&distorted),
            radius,
            distorted_radius: factor * radius,
            factor,
            valid: radius <= max_radius,
            space,
        }
    }

    /// Takes a point of the output space back to the Euclidean plane.
    pub fn inverse(
        mapping: &LinearMapping,
        distortion: &FovDistortion,
        max_radius: f64,
        space: ProjectionSpace,
        image: &Vector2<f64>,
    ) -> Self {
        let distorted = mapping.invert(image);
        let distorted_radius = distorted.norm();
        let (undistortion, radius) = distortion.undistortion_factor(distorted_radius);
        ProjectionRecord {
            euclidean: undistortion * distorted,
            distorted,
            image: *image,
            radius,
            distorted_radius,
            factor: 1.0 / undistortion,
            valid: radius <= max_radius,
            space,
        }
    }
}

/// Pixel projection of `euclidean` for an arbitrary parameter vector.
pub fn project_with_parameters(
    params: &CameraParameters,
    image_size: &ImageSize,
    euclidean: &Vector2<f64>,
) -> Vector2<f64> {
    let state = DerivedState::compute(params, image_size);
    ProjectionRecord::forward(
        &state.pixel,
        &state.distortion,
        state.max_radius,
        ProjectionSpace::Pixel,
        euclidean,
    )
    .image
}

/// Numerical 2×5 Jacobian of the pixel projection of `euclidean` with respect
/// to `[fx_n, fy_n, cx_n, cy_n, w]`, by forward differences of
/// [`PARAMETER_STEP`].
///
/// The distortion column is left at zero when `w == 0`, where the parameter
/// has no effect. Every perturbed state is built from a copy of `params`.
pub fn camera_parameter_derivs(
    params: &CameraParameters,
    image_size: &ImageSize,
    euclidean: &Vector2<f64>,
) -> ParameterJacobian {
    let mut derivs = ParameterJacobian::zeros();
    let base = project_with_parameters(params, image_size, euclidean);

    for i in 0..NUM_CAMERA_PARAMETERS {
        if i == NUM_CAMERA_PARAMETERS - 1 && params.w == 0.0 {
            continue;
        }
        let mut update = ParameterVector::zeros();
        update[i] = PARAMETER_STEP;
        let perturbed = project_with_parameters(&params.updated(&update), image_size, euclidean);
        derivs.set_column(i, &((perturbed - base) / PARAMETER_STEP));
    }

    derivs
}

/// ATAN camera with normalized intrinsics and a cached last projection.
///
/// # Examples
///
/// ```rust
/// use atan_camera::camera::{AtanCamera, CameraParameters, ImageSize};
/// use nalgebra::Vector2;
///
/// let params = CameraParameters::new(0.5, 0.8, 0.5, 0.5, 0.07);
/// let mut camera = AtanCamera::with_parameters("Camera", params, ImageSize::new(640.0, 480.0));
///
/// let pixel = camera.project(&Vector2::new(0.0, 0.0));
/// assert!((pixel.x - 319.5).abs() < 1e-12);
/// assert!((pixel.y - 239.5).abs() < 1e-12);
///
/// // At the centre the distortion scale tends to 2 · tan(w/2) / w.
/// let jacobian = camera.get_projection_derivs().unwrap();
/// let scale = 2.0 * (0.07_f64 / 2.0).tan() / 0.07;
/// assert!((jacobian[(0, 0)] - 320.0 * scale).abs() < 1e-9);
/// ```
#[derive(Clone)]
pub struct AtanCamera {
    name: String,
    params: CameraParameters,
    image_size: ImageSize,
    derived: DerivedState,
    last: Option<ProjectionRecord>,
}

impl AtanCamera {
    /// Creates a camera with the default parameters.
    pub fn new(name: &str, image_size: ImageSize) -> Self {
        Self::with_parameters(name, CameraParameters::DEFAULT, image_size)
    }

    /// Creates a camera with explicit parameters. Nothing is validated; see
    /// [`CameraModel::validate_params`].
    pub fn with_parameters(name: &str, params: CameraParameters, image_size: ImageSize) -> Self {
        let camera = AtanCamera {
            name: name.to_string(),
            params,
            image_size,
            derived: DerivedState::compute(&params, &image_size),
            last: None,
        };
        info!("new ATAN camera is: {:?}", camera);
        camera
    }

    /// Creates a camera whose parameters are read from `store` under
    /// `"<name>.Parameters"`, falling back to the defaults.
    pub fn from_store(name: &str, image_size: ImageSize, store: &dyn ParameterStore) -> Self {
        let key = parameters_key(name);
        let params = match store.get(&key) {
            Some(params) => params,
            None => {
                warn!("no value for '{}', using default camera parameters", key);
                CameraParameters::DEFAULT
            }
        };
        Self::with_parameters(name, params, image_size)
    }

    /// Writes the current parameters to `store`.
    pub fn save_to_store(&self, store: &mut dyn ParameterStore) {
        let key = parameters_key(&self.name);
        info!("storing {} = {:?}", key, self.params.to_vec());
        store.set(&key, self.params);
    }

    /// Re-reads the parameters after the store changed externally. Keeps the
    /// current parameters when the store has no entry.
    pub fn reload_from_store(&mut self, store: &dyn ParameterStore) {
        let key = parameters_key(&self.name);
        match store.get(&key) {
            Some(params) => self.set_parameters(params),
            None => warn!("no value for '{}', keeping current parameters", key),
        }
    }

    /// Recomputes all derived state and forgets the last projection.
    pub fn refresh_params(&mut self) {
        self.derived = DerivedState::compute(&self.params, &self.image_size);
        self.last = None;
        debug!(
            "{}: focal {:?} center {:?} max radius {}",
            self.name,
            self.derived.pixel.focal.as_slice(),
            self.derived.pixel.center.as_slice(),
            self.derived.max_radius
        );
    }

    /// Changes the image size. The normalized parameters are kept, so pixel
    /// focal lengths and the principal point scale with the new size.
    ///
    /// # Arguments
    ///
    /// * `image_size` - The new image width and height in pixels.
    pub fn set_image_size(&mut self, image_size: ImageSize) {
        self.image_size = image_size;
        self.refresh_params();
    }

    /// Replaces all five normalized parameters and refreshes the derived state.
    ///
    /// # Arguments
    ///
    /// * `params` - The new `[fx_n, fy_n, cx_n, cy_n, w]`.
    pub fn set_parameters(&mut self, params: CameraParameters) {
        self.params = params;
        self.refresh_params();
    }

    /// Adds `update` to the parameter vector.
    ///
    /// # Arguments
    ///
    /// * `update` - Increments in `[fx_n, fy_n, cx_n, cy_n, w]` order.
    pub fn update_params(&mut self, update: &ParameterVector) {
        self.params = self.params.updated(update);
        self.refresh_params();
    }

    /// Sets `w` to zero, which also zeroes its parameter derivatives.
    pub fn disable_radial_distortion(&mut self) {
        self.params.w = 0.0;
        self.refresh_params();
    }

    /// Name used to build the parameter store key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The normalized `[fx_n, fy_n, cx_n, cy_n, w]` parameters.
    pub fn parameters(&self) -> &CameraParameters {
        &self.params
    }

    /// Image size in pixels.
    pub fn image_size(&self) -> &ImageSize {
        &self.image_size
    }

    /// All quantities computed from the parameters and the image size.
    pub fn derived_state(&self) -> &DerivedState {
        &self.derived
    }

    /// Focal lengths in pixels.
    pub fn focal(&self) -> Vector2<f64> {
        self.derived.pixel.focal
    }

    /// Principal point in pixels, including the half-pixel shift.
    pub fn center(&self) -> Vector2<f64> {
        self.derived.pixel.center
    }

    /// Reciprocals of [`AtanCamera::focal`].
    pub fn inv_focal(&self) -> Vector2<f64> {
        self.derived.pixel.inv_focal
    }

    /// The FOV distortion constants for the current `w`.
    pub fn distortion(&self) -> &FovDistortion {
        &self.derived.distortion
    }

    /// `false` when `w == 0`.
    pub fn distortion_enabled(&self) -> bool {
        self.derived.distortion.is_enabled()
    }

    /// Undistorted radius of the image corner farthest from the principal point.
    pub fn largest_radius_in_image(&self) -> f64 {
        self.derived.largest_radius
    }

    /// Undistorted radius beyond which projections are flagged invalid.
    pub fn max_valid_radius(&self) -> f64 {
        self.derived.max_radius
    }

    /// Approximate size of one pixel at the image centre, on the Euclidean plane.
    pub fn one_pixel_distance(&self) -> f64 {
        self.derived.one_pixel_distance
    }

    /// Minimum corner of the back-projected image bounding box.
    pub fn image_plane_top_left(&self) -> Vector2<f64> {
        self.derived.image_plane_top_left
    }

    /// Maximum corner of the back-projected image bounding box.
    pub fn image_plane_bottom_right(&self) -> Vector2<f64> {
        self.derived.image_plane_bottom_right
    }

    /// Focal term of the map from the back-projected image box onto `[0, 1]²`.
    pub fn ufb_linear_focal(&self) -> Vector2<f64> {
        self.derived.ufb_linear.focal
    }

    /// Offset term of the map from the back-projected image box onto `[0, 1]²`.
    pub fn ufb_linear_center(&self) -> Vector2<f64> {
        self.derived.ufb_linear.center
    }

    /// Record of the last stateful projection or unprojection, if any.
    pub fn last_projection(&self) -> Option<&ProjectionRecord> {
        self.last.as_ref()
    }

    /// Validity flag of the last projection, `None` if there was none.
    pub fn is_last_projection_valid(&self) -> Option<bool> {
        self.last.map(|record| record.valid)
    }

    /// Projects a point of the normalized Euclidean plane to pixels without
    /// touching the camera.
    ///
    /// # Arguments
    ///
    /// * `euclidean` - The point `(x / z, y / z)`.
    ///
    /// # Return Value
    ///
    /// The full [`ProjectionRecord`], pixel in `image`.
    pub fn project_record(&self, euclidean: &Vector2<f64>) -> ProjectionRecord {
        ProjectionRecord::forward(
            &self.derived.pixel,
            &self.derived.distortion,
            self.derived.max_radius,
            ProjectionSpace::Pixel,
            euclidean,
        )
    }

    /// Unprojects a pixel to the normalized Euclidean plane without touching
    /// the camera.
    ///
    /// # Arguments
    ///
    /// * `pixel` - Pixel coordinates, `(0, 0)` being the centre of the top-left pixel.
    ///
    /// # Return Value
    ///
    /// The full [`ProjectionRecord`], point in `euclidean`.
    pub fn unproject_record(&self, pixel: &Vector2<f64>) -> ProjectionRecord {
        ProjectionRecord::inverse(
            &self.derived.pixel,
            &self.derived.distortion,
            self.derived.max_radius,
            ProjectionSpace::Pixel,
            pixel,
        )
    }

    /// Device-normalized counterpart of [`AtanCamera::project_record`].
    pub fn ufb_project_record(&self, euclidean: &Vector2<f64>) -> ProjectionRecord {
        ProjectionRecord::forward(
            &self.derived.device,
            &self.derived.distortion,
            self.derived.max_radius,
            ProjectionSpace::Device,
            euclidean,
        )
    }

    /// Device-normalized counterpart of [`AtanCamera::unproject_record`].
    pub fn ufb_unproject_record(&self, device: &Vector2<f64>) -> ProjectionRecord {
        ProjectionRecord::inverse(
            &self.derived.device,
            &self.derived.distortion,
            self.derived.max_radius,
            ProjectionSpace::Device,
            device,
        )
    }

    /// Projects a point of the normalized Euclidean plane to pixels and
    /// remembers the intermediate results.
    pub fn project(&mut self, euclidean: &Vector2<f64>) -> Vector2<f64> {
        let record = self.project_record(euclidean);
        self.last = Some(record);
        record.image
    }

    /// Unprojects a pixel to the normalized Euclidean plane and remembers the
    /// intermediate results.
    pub fn unproject(&mut self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let record = self.unproject_record(pixel);
        self.last = Some(record);
        record.euclidean
    }

    /// Like [`AtanCamera::project`] but into device-normalized coordinates.
    pub fn ufb_project(&mut self, euclidean: &Vector2<f64>) -> Vector2<f64> {
        let record = self.ufb_project_record(euclidean);
        self.last = Some(record);
        record.image
    }

    /// Like [`AtanCamera::unproject`] but from device-normalized coordinates.
    pub fn ufb_unproject(&mut self, device: &Vector2<f64>) -> Vector2<f64> {
        let record = self.ufb_unproject_record(device);
        self.last = Some(record);
        record.euclidean
    }

    /// Analytic 2×2 Jacobian of the pixel projection with respect to the
    /// Euclidean point of `record`:
    ///
    /// ```text
    /// (d u / d x, d u / d y)
    /// (d v / d x, d v / d y)
    /// ```
    ///
    /// Pixel-space focal lengths are used whatever the record's space.
    pub fn projection_derivs_at(&self, record: &ProjectionRecord) -> Matrix2<f64> {
        let x = record.euclidean.x;
        let y = record.euclidean.y;
        let scale = record.factor;
        let focal = self.derived.pixel.focal;

        let d = self
            .derived
            .distortion
            .scale_derivative_over_radius(record.radius, scale);
        let dfrac_dx = d * x;
        let dfrac_dy = d * y;

        Matrix2::new(
            focal.x * (dfrac_dx * x + scale),
            focal.x * (dfrac_dy * x),
            focal.y * (dfrac_dx * y),
            focal.y * (dfrac_dy * y + scale),
        )
    }

    /// Analytic Jacobian at an explicit Euclidean point.
    pub fn projection_derivs_for(&self, euclidean: &Vector2<f64>) -> Matrix2<f64> {
        self.projection_derivs_at(&self.project_record(euclidean))
    }

    /// Jacobian at the last projection.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NoProjectionPerformed`] if nothing was projected
    /// since construction or the last parameter change.
    pub fn get_projection_derivs(&self) -> Result<Matrix2<f64>, CameraModelError> {
        let record = self.last.ok_or(CameraModelError::NoProjectionPerformed)?;
        Ok(self.projection_derivs_at(&record))
    }

    /// Parameter Jacobian at an explicit Euclidean point. See
    /// [`camera_parameter_derivs`].
    pub fn camera_parameter_derivs_for(&self, euclidean: &Vector2<f64>) -> ParameterJacobian {
        camera_parameter_derivs(&self.params, &self.image_size, euclidean)
    }

    /// Parameter Jacobian at the Euclidean point of the last projection. The
    /// camera is left untouched.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NoProjectionPerformed`] if nothing was projected
    /// since construction or the last parameter change.
    pub fn get_camera_parameter_derivs(&self) -> Result<ParameterJacobian, CameraModelError> {
        let record = self.last.ok_or(CameraModelError::NoProjectionPerformed)?;
        Ok(self.camera_parameter_derivs_for(&record.euclidean))
    }

    /// Off-axis perspective matrix for the back-projected image bounding box.
    /// Maps a right-handed camera frame with +Z forward onto the `[-1, 1]³`
    /// clip volume. The image top edge maps to `y = +1`.
    pub fn make_frustum_matrix(&self, near: f64, far: f64) -> Matrix4<f64> {
        let left = self.derived.image_plane_top_left.x * near;
        let right = self.derived.image_plane_bottom_right.x * near;
        let top = self.derived.image_plane_top_left.y * near;
        let bottom = self.derived.image_plane_bottom_right.y * near;

        let mut m4 = Matrix4::zeros();
        m4[(0, 0)] = (2.0 * near) / (right - left);
        m4[(1, 1)] = (2.0 * near) / (top - bottom);

        m4[(0, 2)] = (right + left) / (left - right);
        m4[(1, 2)] = (top + bottom) / (bottom - top);
        m4[(2, 2)] = (far + near) / (far - near);
        m4[(3, 2)] = 1.0;

        m4[(2, 3)] = 2.0 * near * far / (near - far);
        m4
    }

    fn intrinsics_from_yaml(doc: &yaml_rust::Yaml) -> Result<CameraParameters, CameraModelError> {
        let intrinsics_yaml = doc["cam0"]["intrinsics"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams(
                "YAML missing 'intrinsics' array under 'cam0'".to_string(),
            )
        })?;
        let values = intrinsics_yaml
            .iter()
            .map(|value| {
                value
                    .as_f64()
                    .or_else(|| value.as_i64().map(|v| v as f64))
                    .ok_or_else(|| {
                        CameraModelError::InvalidParams(
                            "Invalid intrinsics in YAML: not a float".to_string(),
                        )
                    })
            })
            .collect::<Result<Vec<f64>, CameraModelError>>()?;
        CameraParameters::from_slice(&values)
    }
}

/// Provides a debug string representation for [`AtanCamera`].
impl fmt::Debug for AtanCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ATAN {} [fx: {} fy: {} cx: {} cy: {} w: {}] image {}x{}",
            self.name,
            self.params.fx,
            self.params.fy,
            self.params.cx,
            self.params.cy,
            self.params.w,
            self.image_size.width,
            self.image_size.height
        )
    }
}

impl CameraModel for AtanCamera {
    /// Projects a camera-frame 3D point to pixels.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If `z` is too close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: If the point lies beyond
    ///   the validity radius of the model.
    fn project_point(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let euclidean = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let record = self.project_record(&euclidean);
        if !record.valid {
            return Err(CameraModelError::ProjectionOutSideImage);
        }
        Ok(record.image)
    }

    /// Unprojects a pixel to a unit-length ray.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If the pixel is outside
    ///   the image, whose border pixels span `[-0.5, size - 0.5]`.
    fn unproject_point(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        let low = -0.5;
        if point_2d.x < low
            || point_2d.x > self.image_size.width + low
            || point_2d.y < low
            || point_2d.y > self.image_size.height + low
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }
        let euclidean = self.unproject_record(point_2d).euclidean;
        Ok(Vector3::new(euclidean.x, euclidean.y, 1.0).normalize())
    }

    /// Loads an ATAN camera from a YAML file laid out as
    ///
    /// ```yaml
    /// cam0:
    ///   camera_model: atan
    ///   intrinsics: [fx_n, fy_n, cx_n, cy_n, w]
    ///   resolution: [width, height]
    /// ```
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`] / [`CameraModelError::YamlError`] for
    ///   unreadable or malformed files.
    /// * [`CameraModelError::InvalidParams`] for missing or mistyped fields.
    /// * Errors from `validate_params`.
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }
        let doc = &docs[0];

        let params = Self::intrinsics_from_yaml(doc)?;

        let resolution_yaml = doc["cam0"]["resolution"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams(
                "YAML missing 'resolution' array under 'cam0'".to_string(),
            )
        })?;
        if resolution_yaml.len() < 2 {
            return Err(CameraModelError::InvalidParams(
                "Resolution array in YAML must have at least 2 elements (width, height)"
                    .to_string(),
            ));
        }
        let dimension = |value: &yaml_rust::Yaml, label: &str| {
            value
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!(
                        "Invalid {label} in YAML: not a non-negative integer"
                    ))
                })
        };
        let resolution = Resolution {
            width: dimension(&resolution_yaml[0], "width")?,
            height: dimension(&resolution_yaml[1], "height")?,
        };

        let model = AtanCamera::with_parameters("cam0", params, ImageSize::from(resolution));
        model.validate_params()?;
        Ok(model)
    }

    /// Saves the parameters under `cam0` with `camera_model: atan`.
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let resolution = self.get_resolution();
        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::to_value(serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("camera_model".to_string()),
                    serde_yaml::Value::String("atan".to_string()),
                ),
                (
                    serde_yaml::Value::String("intrinsics".to_string()),
                    serde_yaml::to_value(self.params.to_vec())?,
                ),
                (
                    serde_yaml::Value::String("resolution".to_string()),
                    serde_yaml::to_value(vec![resolution.width, resolution.height])?,
                ),
            ]))?,
        )]))?;

        let yaml_string = serde_yaml::to_string(&yaml)?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        info!("saved {:?} to {}", self, path);

        Ok(())
    }

    /// Checks the pixel-space intrinsics, the image size and `w`.
    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_image_size(&self.image_size)?;
        validation::validate_intrinsics(&self.get_intrinsics())?;
        validation::validate_distortion_angle(self.params.w)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        Resolution {
            width: self.image_size.width.round() as u32,
            height: self.image_size.height.round() as u32,
        }
    }

    /// Pixel-space focal lengths and principal point (with the half-pixel shift).
    fn get_intrinsics(&self) -> Intrinsics {
        Intrinsics {
            fx: self.derived.pixel.focal.x,
            fy: self.derived.pixel.focal.y,
            cx: self.derived.pixel.center.x,
            cy: self.derived.pixel.center.y,
        }
    }

    fn get_distortion(&self) -> Vec<f64> {
        vec![self.params.w]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryParameterStore;
    use approx::assert_relative_eq;

    fn get_sample_camera() -> AtanCamera {
        AtanCamera::with_parameters(
            "Camera",
            CameraParameters::new(0.5, 0.8, 0.5, 0.5, 0.07),
            ImageSize::new(640.0, 480.0),
        )
    }

    fn get_wide_camera() -> AtanCamera {
        AtanCamera::with_parameters(
            "Wide",
            CameraParameters::new(0.45, 0.6, 0.52, 0.47, 0.9),
            ImageSize::new(752.0, 480.0),
        )
    }

    fn numeric_projection_derivs(camera: &AtanCamera, point: &Vector2<f64>) -> Matrix2<f64> {
        let h = 1e-6;
        let mut jacobian = Matrix2::zeros();
        for j in 0..2 {
            let mut step = Vector2::zeros();
            step[j] = h;
            let plus = camera.project_record(&(point + step)).image;
            let minus = camera.project_record(&(point - step)).image;
            jacobian.set_column(j, &((plus - minus) / (2.0 * h)));
        }
        jacobian
    }

    #[test]
    fn test_project_center_scenario() {
        let mut camera = get_sample_camera();
        let pixel = camera.project(&Vector2::new(0.0, 0.0));
        assert_relative_eq!(pixel.x, 640.0 * 0.5 - 0.5);
        assert_relative_eq!(pixel.y, 480.0 * 0.5 - 0.5);
        assert_eq!(pixel, camera.center());

        let euclidean = camera.unproject(&pixel);
        assert_relative_eq!(euclidean, Vector2::new(0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_project_unproject_round_trip() {
        for mut camera in [get_sample_camera(), get_wide_camera()] {
            let max_radius = camera.max_valid_radius();
            for &(x, y) in &[
                (0.004, -0.003),
                (0.0071, 0.0071),
                (0.2, 0.1),
                (-0.5, 0.3),
                (0.9, -0.6),
            ] {
                let point = Vector2::new(x, y);
                assert!(point.norm() < max_radius);
                let pixel = camera.project(&point);
                assert!(pixel.x.is_finite() && pixel.y.is_finite());
                let back = camera.unproject(&pixel);
                assert_relative_eq!(back, point, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_unproject_project_round_trip_inside_image() {
        let mut camera = get_wide_camera();
        for &(u, v) in &[(0.0, 0.0), (100.0, 400.0), (376.0, 240.0), (751.0, 479.0)] {
            let pixel = Vector2::new(u, v);
            let euclidean = camera.unproject(&pixel);
            let back = camera.project(&euclidean);
            assert_relative_eq!(back, pixel, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_round_trip_near_principal_point() {
        let mut camera = get_wide_camera();
        let center = camera.center();
        let focal_x = camera.focal().x;
        let mut worst: f64 = 0.0;
        for i in 0..=400 {
            let rd = 0.0095 + 0.002 * i as f64 / 400.0;
            let pixel = center + Vector2::new(focal_x * rd, 0.0);
            let euclidean = camera.unproject(&pixel);
            let back = camera.project(&euclidean);
            worst = worst.max((back - pixel).norm());
        }
        assert!(worst < 1e-9, "worst round-trip error {worst}");

        // The forward map has no jump at the centre threshold.
        let inside = camera.project_record(&Vector2::new(0.01, 0.0)).image;
        let outside = camera.project_record(&Vector2::new(0.0100001, 0.0)).image;
        assert!((outside.x - inside.x).abs() < 1e-3);
        assert!(outside.x > inside.x);
    }

    #[test]
    fn test_projection_derivs_near_center() {
        let camera = get_wide_camera();
        for &(x, y) in &[(0.004, 0.003), (0.0071, -0.0069), (0.0, 0.0)] {
            let point = Vector2::new(x, y);
            let analytic = camera.projection_derivs_for(&point);
            let numeric = numeric_projection_derivs(&camera, &point);
            assert_relative_eq!(analytic, numeric, epsilon = 1e-4, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_unproject_record_uses_forward_factor() {
        let camera = get_wide_camera();
        let forward = camera.project_record(&Vector2::new(0.4, -0.2));
        let inverse = camera.unproject_record(&forward.image);
        assert_relative_eq!(inverse.factor, forward.factor, epsilon = 1e-9);
        assert_relative_eq!(inverse.radius, forward.radius, epsilon = 1e-9);
        assert_relative_eq!(inverse.distorted_radius, forward.distorted_radius, epsilon = 1e-9);
        assert_relative_eq!(inverse.distorted, forward.distorted, epsilon = 1e-9);
    }

    #[test]
    fn test_pinhole_projection() {
        let mut camera = get_sample_camera();
        camera.disable_radial_distortion();
        assert!(!camera.distortion_enabled());

        let point = Vector2::new(0.7, -0.45);
        let pixel = camera.project(&point);
        let expected = camera.center() + camera.focal().component_mul(&point);
        assert_eq!(pixel, expected);

        let jacobian = camera.get_projection_derivs().unwrap();
        assert_eq!(jacobian, Matrix2::new(320.0, 0.0, 0.0, 384.0));
    }

    #[test]
    fn test_projection_derivs_match_finite_differences() {
        let camera = get_wide_camera();
        for &(x, y) in &[(0.3, 0.2), (-0.6, 0.4), (0.05, -0.8), (1.0, 0.7)] {
            let point = Vector2::new(x, y);
            let analytic = camera.projection_derivs_for(&point);
            let numeric = numeric_projection_derivs(&camera, &point);
            assert_relative_eq!(analytic, numeric, epsilon = 1e-4, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_get_projection_derivs_uses_last_projection() {
        let mut camera = get_wide_camera();
        let point = Vector2::new(-0.35, 0.25);
        camera.project(&point);
        let stateful = camera.get_projection_derivs().unwrap();
        assert_eq!(stateful, camera.projection_derivs_for(&point));

        // An unprojection leaves an equivalent record behind.
        let pixel = camera.project_record(&point).image;
        camera.unproject(&pixel);
        let after_unproject = camera.get_projection_derivs().unwrap();
        assert_relative_eq!(after_unproject, stateful, epsilon = 1e-6);
    }

    #[test]
    fn test_derivs_require_a_projection() {
        let mut camera = get_sample_camera();
        assert!(matches!(
            camera.get_projection_derivs(),
            Err(CameraModelError::NoProjectionPerformed)
        ));
        assert!(matches!(
            camera.get_camera_parameter_derivs(),
            Err(CameraModelError::NoProjectionPerformed)
        ));

        camera.project(&Vector2::new(0.1, 0.1));
        assert!(camera.get_projection_derivs().is_ok());

        camera.set_image_size(ImageSize::new(320.0, 240.0));
        assert!(camera.last_projection().is_none());
        assert!(matches!(
            camera.get_projection_derivs(),
            Err(CameraModelError::NoProjectionPerformed)
        ));
    }

    #[test]
    fn test_validity_boundary() {
        let mut camera = get_sample_camera();
        let max_radius = camera.max_valid_radius();

        camera.project(&Vector2::new(max_radius, 0.0));
        assert_eq!(camera.is_last_projection_valid(), Some(true));

        let pixel = camera.project(&Vector2::new(max_radius * 1.0001, 0.0));
        assert_eq!(camera.is_last_projection_valid(), Some(false));
        assert!(pixel.x.is_finite());

        camera.ufb_project(&Vector2::new(0.0, max_radius * 1.0001));
        assert_eq!(camera.is_last_projection_valid(), Some(false));
    }

    #[test]
    fn test_parameter_derivs_leave_camera_untouched() {
        let mut camera = get_wide_camera();
        camera.project(&Vector2::new(0.3, -0.4));
        let before = camera.clone();

        let derivs = camera.get_camera_parameter_derivs().unwrap();
        assert!(derivs.iter().all(|v| v.is_finite()));

        assert_eq!(camera.parameters(), before.parameters());
        assert_eq!(camera.image_size(), before.image_size());
        assert_eq!(camera.derived_state(), before.derived_state());
        assert_eq!(camera.last_projection(), before.last_projection());
    }

    #[test]
    fn test_parameter_derivs_values() {
        let camera = get_wide_camera();
        let point = Vector2::new(0.3, -0.4);
        let record = camera.project_record(&point);
        let derivs = camera.camera_parameter_derivs_for(&point);

        // fx_n and fy_n scale the distorted point by the image size.
        assert_relative_eq!(derivs[(0, 0)], 752.0 * record.distorted.x, epsilon = 1e-6);
        assert_relative_eq!(derivs[(1, 0)], 0.0, epsilon = 1e-9);
        assert_relative_eq!(derivs[(1, 1)], 480.0 * record.distorted.y, epsilon = 1e-6);
        // cx_n and cy_n shift the centre.
        assert_relative_eq!(derivs[(0, 2)], 752.0, epsilon = 1e-6);
        assert_relative_eq!(derivs[(1, 3)], 480.0, epsilon = 1e-6);
        assert_relative_eq!(derivs[(0, 3)], 0.0, epsilon = 1e-9);

        let h = 1e-6;
        let params = *camera.parameters();
        let mut plus = params;
        plus.w += h;
        let mut minus = params;
        minus.w -= h;
        let numeric = (project_with_parameters(&plus, camera.image_size(), &point)
            - project_with_parameters(&minus, camera.image_size(), &point))
            / (2.0 * h);
        assert_relative_eq!(derivs[(0, 4)], numeric.x, max_relative = 1e-2);
        assert_relative_eq!(derivs[(1, 4)], numeric.y, max_relative = 1e-2);
    }

    #[test]
    fn test_parameter_derivs_without_distortion() {
        let mut camera = get_wide_camera();
        camera.disable_radial_distortion();
        camera.project(&Vector2::new(0.3, -0.4));
        let derivs = camera.get_camera_parameter_derivs().unwrap();
        assert_eq!(derivs[(0, 4)], 0.0);
        assert_eq!(derivs[(1, 4)], 0.0);
        assert!(derivs[(0, 0)] != 0.0);
    }

    #[test]
    fn test_update_params() {
        let mut camera = get_sample_camera();
        camera.update_params(&ParameterVector::new(0.1, 0.0, 0.0, 0.0, 0.0));
        assert_relative_eq!(camera.parameters().fx, 0.6, epsilon = 1e-12);
        assert_relative_eq!(camera.focal().x, 384.0, epsilon = 1e-9);

        let expected = DerivedState::compute(camera.parameters(), camera.image_size());
        assert_eq!(camera.derived_state(), &expected);
    }

    #[test]
    fn test_set_image_size_rescales_pixels() {
        let mut camera = get_sample_camera();
        let point = Vector2::new(0.2, 0.1);
        let original = camera.project(&point);
        camera.set_image_size(ImageSize::new(1280.0, 960.0));
        let scaled = camera.project(&point);
        assert_relative_eq!(scaled.x + 0.5, 2.0 * (original.x + 0.5), epsilon = 1e-9);
        assert_relative_eq!(scaled.y + 0.5, 2.0 * (original.y + 0.5), epsilon = 1e-9);
        assert_relative_eq!(camera.max_valid_radius(), get_sample_camera().max_valid_radius());
    }

    #[test]
    fn test_ufb_projection() {
        let mut camera = get_wide_camera();
        let point = Vector2::new(0.25, -0.15);
        let device = camera.ufb_project(&point);
        let record = *camera.last_projection().unwrap();
        assert_eq!(record.space, ProjectionSpace::Device);

        let params = camera.parameters();
        assert_relative_eq!(device.x, params.cx + params.fx * record.distorted.x);
        assert_relative_eq!(device.y, params.cy + params.fy * record.distorted.y);

        let pixel = camera.project_record(&point).image;
        let size = camera.image_size();
        assert_relative_eq!(pixel.x, size.width * device.x - 0.5, epsilon = 1e-9);
        assert_relative_eq!(pixel.y, size.height * device.y - 0.5, epsilon = 1e-9);

        let back = camera.ufb_unproject(&device);
        assert_relative_eq!(back, point, epsilon = 1e-9);
    }

    #[test]
    fn test_frustum_matrix_maps_image_box_to_clip_volume() {
        let camera = get_wide_camera();
        let (near, far) = (0.1, 100.0);
        let m4 = camera.make_frustum_matrix(near, far);
        let tl = camera.image_plane_top_left();
        let br = camera.image_plane_bottom_right();

        let to_ndc = |p: nalgebra::Vector4<f64>| {
            let clip = m4 * p;
            Vector3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w)
        };

        let top_left = to_ndc(nalgebra::Vector4::new(tl.x * near, tl.y * near, near, 1.0));
        assert_relative_eq!(top_left, Vector3::new(-1.0, 1.0, -1.0), epsilon = 1e-9);

        let bottom_right = to_ndc(nalgebra::Vector4::new(br.x * far, br.y * far, far, 1.0));
        assert_relative_eq!(bottom_right, Vector3::new(1.0, -1.0, 1.0), epsilon = 1e-9);

        assert_eq!(m4[(3, 2)], 1.0);
        assert_eq!(m4[(3, 3)], 0.0);
    }

    #[test]
    fn test_store_round_trip() {
        let mut store = MemoryParameterStore::default();
        let camera = AtanCamera::from_store("Camera", ImageSize::new(640.0, 480.0), &store);
        assert_eq!(camera.parameters(), &CameraParameters::DEFAULT);

        let mut wide = get_wide_camera();
        wide.save_to_store(&mut store);
        assert_eq!(store.get("Wide.Parameters"), Some(*wide.parameters()));

        store.set(
            "Wide.Parameters",
            CameraParameters::new(0.4, 0.5, 0.5, 0.5, 0.0),
        );
        wide.project(&Vector2::new(0.1, 0.0));
        wide.reload_from_store(&store);
        assert_eq!(wide.parameters().fx, 0.4);
        assert!(!wide.distortion_enabled());
        assert!(wide.last_projection().is_none());
    }

    #[test]
    fn test_camera_model_project_point() {
        let camera = get_sample_camera();
        let point_3d = Vector3::new(0.4, -0.2, 2.0);
        let pixel = camera.project_point(&point_3d).unwrap();
        assert_eq!(pixel, camera.project_record(&Vector2::new(0.2, -0.1)).image);

        let ray = camera.unproject_point(&pixel).unwrap();
        assert_relative_eq!(ray, point_3d.normalize(), epsilon = 1e-9);

        assert!(matches!(
            camera.project_point(&Vector3::new(0.1, 0.1, 0.0)),
            Err(CameraModelError::PointAtCameraCenter)
        ));
        let far_out = camera.max_valid_radius() * 2.0;
        assert!(matches!(
            camera.project_point(&Vector3::new(far_out, 0.0, 1.0)),
            Err(CameraModelError::ProjectionOutSideImage)
        ));
        assert!(matches!(
            camera.unproject_point(&Vector2::new(-1.0, 10.0)),
            Err(CameraModelError::PointIsOutSideImage)
        ));
    }

    #[test]
    fn test_load_from_yaml() {
        let camera = AtanCamera::load_from_yaml("samples/atan.yaml").unwrap();
        assert_eq!(camera.name(), "cam0");
        assert_eq!(camera.parameters(), &CameraParameters::new(0.5, 0.8, 0.5, 0.5, 0.07));
        assert_eq!(camera.get_resolution(), Resolution { width: 640, height: 480 });
        assert_eq!(camera.get_distortion(), vec![0.07]);
        let intrinsics = camera.get_intrinsics();
        assert_relative_eq!(intrinsics.fx, 320.0);
        assert_relative_eq!(intrinsics.cy, 239.5);
    }

    #[test]
    fn test_save_and_load_yaml() {
        let camera = get_wide_camera();
        let path = std::env::temp_dir().join("atan_camera_save_test.yaml");
        let path = path.to_str().unwrap();
        camera.save_to_yaml(path).unwrap();

        let loaded = AtanCamera::load_from_yaml(path).unwrap();
        assert_eq!(loaded.parameters(), camera.parameters());
        assert_eq!(loaded.get_resolution(), camera.get_resolution());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_load_from_yaml_rejects_negative_resolution() {
        let path = std::env::temp_dir().join("atan_camera_negative_resolution.yaml");
        fs::write(
            &path,
            "cam0:\n  camera_model: atan\n  intrinsics: [0.5, 0.8, 0.5, 0.5, 0.07]\n  resolution: [-1, 480]\n",
        )
        .unwrap();
        let result = AtanCamera::load_from_yaml(path.to_str().unwrap());
        assert!(matches!(result, Err(CameraModelError::InvalidParams(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_validate_params() {
        let camera = get_sample_camera();
        assert!(camera.validate_params().is_ok());

        let degenerate = AtanCamera::with_parameters(
            "Broken",
            CameraParameters::new(0.0, 0.8, 0.5, 0.5, 0.07),
            ImageSize::new(640.0, 480.0),
        );
        assert!(matches!(
            degenerate.validate_params(),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));

        let empty = AtanCamera::new("Empty", ImageSize::new(0.0, 0.0));
        assert!(matches!(
            empty.validate_params(),
            Err(CameraModelError::ImageSizeMustBePositive)
        ));
    }
}
