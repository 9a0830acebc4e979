//! Registration and atlas configuration, read from `volreg.yaml`.
//!
//! Every field has a built-in default, so a partial file only needs to list
//! what it overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::Orientation;

const CONFIG_FILENAME: &str = "volreg.yaml";
const CONFIG_ENV_VAR: &str = "VOLREG_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub affine: AffineConfig,
    pub freeform: FreeformConfig,
    pub segmentation: ProgramConfig,
    pub atlas: AtlasConfig,
}

/// Path to a registration binary. Empty means "look it up on `PATH`".
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgramConfig {
    pub program_path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AffineConfig {
    pub program_path: String,
    /// Number of pyramid levels
    pub n_steps: u32,
    /// Number of those levels actually used
    pub use_n_steps: u32,
}

impl Default for AffineConfig {
    fn default() -> Self {
        Self {
            program_path: String::new(),
            n_steps: 6,
            use_n_steps: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FreeformConfig {
    pub program_path: String,
    pub n_steps: u32,
    pub use_n_steps: u32,
    pub bending_energy_weight: f64,
    pub grid_spacing: GridSpacing,
    pub smoothing_sigma: ReferenceFloating<f64>,
    pub histo_n_bins: ReferenceFloating<u32>,
}

impl Default for FreeformConfig {
    fn default() -> Self {
        Self {
            program_path: String::new(),
            n_steps: 6,
            use_n_steps: 4,
            bending_energy_weight: 0.95,
            grid_spacing: GridSpacing { x: -10 },
            smoothing_sigma: ReferenceFloating {
                reference: -1.0,
                floating: -1.0,
            },
            histo_n_bins: ReferenceFloating {
                reference: 128,
                floating: 128,
            },
        }
    }
}

/// Control point spacing; negative values are in voxels, positive in mm.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GridSpacing {
    pub x: i32,
}

/// A setting given separately for the reference and the floating image.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ReferenceFloating<T> {
    pub reference: T,
    pub floating: T,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Folder holding the default atlas files, `~` is expanded
    pub base_folder: String,
    pub default_atlas_name: String,
    pub default_brain_name: String,
    pub default_hemispheres_name: String,
    pub default_outlines_name: String,
    /// Explicit paths, overriding `base_folder`/`default_*_name` when set
    pub atlas_path: String,
    pub brain_path: String,
    pub hemispheres_path: String,
    pub outlines_path: String,
    #[serde(with = "orientation_name")]
    pub orientation: Orientation,
    /// Voxel size in mm
    pub pixel_size: PixelSize,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            base_folder: "~/.volreg/atlas/".to_string(),
            default_atlas_name: "allen_cff_october_2017_atlas_annotations_10_um.nii".to_string(),
            default_brain_name: "allen_cff_october_2016_average_brain_filtered_10_um.nii"
                .to_string(),
            default_hemispheres_name:
                "allen_cff_october_2017_atlas_hemispheres_annotations_10_um.nii".to_string(),
            default_outlines_name: "allen_cff_october_2017_atlas_outlines_10_um.nii".to_string(),
            atlas_path: String::new(),
            brain_path: String::new(),
            hemispheres_path: String::new(),
            outlines_path: String::new(),
            orientation: Orientation::Horizontal,
            pixel_size: PixelSize {
                x: 0.010,
                y: 0.010,
                z: 0.010,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PixelSize {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PixelSize {
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

mod orientation_name {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::enums::Orientation;

    pub fn serialize<S: Serializer>(orientation: &Orientation, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(orientation)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Orientation, D::Error> {
        let name = String::deserialize(d)?;
        name.parse().map_err(D::Error::custom)
    }
}

impl Config {
    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents, path)
    }
}

/// The loaded configuration, where it came from, and anything worth telling
/// the user about the search.
#[derive(Debug)]
pub struct ConfigHandle {
    pub config: Config,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Load the configuration.
///
/// An explicit `custom_path` must exist and parse. Otherwise the first
/// readable candidate wins, falling back to the built-in defaults.
pub fn load_config(custom_path: Option<&Path>) -> Result<ConfigHandle, ConfigError> {
    if let Some(path) = custom_path {
        let config = Config::from_file(path)?;
        return Ok(ConfigHandle {
            config,
            source: Some(path.to_path_buf()),
            warnings: Vec::new(),
        });
    }

    let mut warnings = Vec::new();
    for candidate in config_candidates() {
        if !candidate.is_file() {
            continue;
        }
        match Config::from_file(&candidate) {
            Ok(config) => {
                let source = fs::canonicalize(&candidate).unwrap_or(candidate);
                return Ok(ConfigHandle {
                    config,
                    source: Some(source),
                    warnings,
                });
            }
            Err(err) => warnings.push(err.to_string()),
        }
    }

    warnings.push("No config found; using built-in defaults.".to_string());
    Ok(ConfigHandle {
        config: Config::default(),
        source: None,
        warnings,
    })
}

fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        candidates.push(PathBuf::from(env_path));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("config").join(CONFIG_FILENAME));
        candidates.push(cwd.join(CONFIG_FILENAME));
    }
    if let Some(home_dir) = dirs::home_dir() {
        candidates.push(home_dir.join(".volreg").join(CONFIG_FILENAME));
    }
    candidates
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.affine.n_steps, 6);
        assert_eq!(config.affine.use_n_steps, 5);
        assert_eq!(config.freeform.use_n_steps, 4);
        assert_eq!(config.freeform.bending_energy_weight, 0.95);
        assert_eq!(config.freeform.grid_spacing.x, -10);
        assert_eq!(config.freeform.histo_n_bins.floating, 128);
        assert_eq!(config.segmentation.program_path, "");
        assert_eq!(config.atlas.orientation, Orientation::Horizontal);
        assert_eq!(config.atlas.pixel_size.as_tuple(), (0.01, 0.01, 0.01));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let yaml = "
affine:
  n_steps: 4
freeform:
  smoothing_sigma:
    reference: -1.0
    floating: -0.0
atlas:
  orientation: horizontal
  pixel_size: {x: 0.025, y: 0.025, z: 0.025}
";
        let config = Config::from_yaml(yaml, Path::new("inline")).unwrap();
        assert_eq!(config.affine.n_steps, 4);
        assert_eq!(config.affine.use_n_steps, 5);
        assert_eq!(config.freeform.smoothing_sigma.floating, -0.0);
        assert_eq!(config.freeform.n_steps, 6);
        assert_eq!(config.atlas.pixel_size.x, 0.025);
        assert_eq!(
            config.atlas.default_atlas_name,
            "allen_cff_october_2017_atlas_annotations_10_um.nii"
        );
    }

    #[test]
    fn unknown_orientation_is_a_parse_error() {
        let yaml = "atlas:\n  orientation: oblique\n";
        assert!(matches!(
            Config::from_yaml(yaml, Path::new("inline")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volreg.yaml");
        fs::write(&path, "segmentation:\n  program_path: /opt/bin/reg_resample\n").unwrap();
        let handle = load_config(Some(&path)).unwrap();
        assert_eq!(handle.source.as_deref(), Some(path.as_path()));
        assert_eq!(
            handle.config.segmentation.program_path,
            "/opt/bin/reg_resample"
        );
    }

    #[test]
    fn yaml_round_trip_of_defaults() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        assert!(yaml.contains("orientation: horizontal"));
        let parsed = Config::from_yaml(&yaml, Path::new("inline")).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn home_is_expanded() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.volreg/atlas/"), home.join(".volreg/atlas/"));
        }
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
