//! Backing stores for camera parameter vectors.
//!
//! Cameras look up their five normalized intrinsics under the key
//! `"<camera name>.Parameters"`. [`MemoryParameterStore`] keeps them in a map,
//! [`YamlParameterStore`] persists them in a YAML file of the form
//!
//! ```yaml
//! Camera.Parameters: [0.5, 0.8, 0.5, 0.5, 0.07]
//! ```

use log::info;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use yaml_rust::{Yaml, YamlLoader};

use crate::camera::{CameraModelError, CameraParameters};

/// Suffix appended to a camera name to form its parameter key.
pub const PARAMETERS_SUFFIX: &str = ".Parameters";

/// Store key under which the parameters of camera `name` live.
///
/// # Arguments
///
/// * `name` - The camera name, e.g. `"Camera"`.
///
/// # Return Value
///
/// `"<name>.Parameters"`.
pub fn parameters_key(name: &str) -> String {
    format!("{name}{PARAMETERS_SUFFIX}")
}

/// Key-value access to parameter vectors.
pub trait ParameterStore {
    /// Looks up the parameters stored under `key`.
    ///
    /// # Return Value
    ///
    /// `None` if there is no entry for `key`.
    fn get(&self, key: &str) -> Option<CameraParameters>;

    /// Stores `params` under `key`, replacing any previous entry.
    fn set(&mut self, key: &str, params: CameraParameters);
}

/// Store that only lives in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryParameterStore {
    values: HashMap<String, CameraParameters>,
}

impl ParameterStore for MemoryParameterStore {
    fn get(&self, key: &str) -> Option<CameraParameters> {
        self.values.get(key).copied()
    }

    fn set(&mut self, key: &str, params: CameraParameters) {
        self.values.insert(key.to_string(), params);
    }
}

/// File-backed store. Changes are kept in memory until [`YamlParameterStore::save`].
#[derive(Debug, Clone)]
pub struct YamlParameterStore {
    path: PathBuf,
    values: BTreeMap<String, CameraParameters>,
}

impl YamlParameterStore {
    /// Creates an empty store that will be written to `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        YamlParameterStore {
            path: path.as_ref().to_path_buf(),
            values: BTreeMap::new(),
        }
    }

    /// Reads every `key: [fx_n, fy_n, cx_n, cy_n, w]` entry of a YAML file.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`] if the file can't be read.
    /// * [`CameraModelError::YamlError`] if it is not valid YAML.
    /// * [`CameraModelError::InvalidParams`] if an entry is not a sequence of
    ///   five numbers.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CameraModelError> {
        let mut store = YamlParameterStore::new(path);
        let contents = fs::read_to_string(&store.path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if let Some(doc) = docs.first() {
            let entries = doc.as_hash().ok_or_else(|| {
                CameraModelError::InvalidParams("parameter file must be a mapping".to_string())
            })?;
            for (key, value) in entries {
                let key = key.as_str().ok_or_else(|| {
                    CameraModelError::InvalidParams("parameter keys must be strings".to_string())
                })?;
                store.values.insert(key.to_string(), parse_parameters(key, value)?);
            }
        }

        info!(
            "loaded {} parameter entries from {}",
            store.values.len(),
            store.path.display()
        );
        Ok(store)
    }

    /// Writes all entries back to the file.
    pub fn save(&self) -> Result<(), CameraModelError> {
        let entries: BTreeMap<&str, Vec<f64>> = self
            .values
            .iter()
            .map(|(key, params)| (key.as_str(), params.to_vec()))
            .collect();
        let yaml_string = serde_yaml::to_string(&entries)?;

        let mut file = fs::File::create(&self.path)?;
        file.write_all(yaml_string.as_bytes())?;
        info!(
            "saved {} parameter entries to {}",
            self.values.len(),
            self.path.display()
        );
        Ok(())
    }

    /// File the store is loaded from and saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All keys in the store, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl ParameterStore for YamlParameterStore {
    fn get(&self, key: &str) -> Option<CameraParameters> {
        self.values.get(key).copied()
    }

    fn set(&mut self, key: &str, params: CameraParameters) {
        self.values.insert(key.to_string(), params);
    }
}

fn parse_parameters(key: &str, value: &Yaml) -> Result<CameraParameters, CameraModelError> {
    let items = value.as_vec().ok_or_else(|| {
        CameraModelError::InvalidParams(format!("'{key}' is not a sequence"))
    })?;
    let values = items
        .iter()
        .map(|item| {
            item.as_f64()
                .or_else(|| item.as_i64().map(|v| v as f64))
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!("'{key}' holds a non-numeric value"))
                })
        })
        .collect::<Result<Vec<f64>, CameraModelError>>()?;
    CameraParameters::from_slice(&values)
}
