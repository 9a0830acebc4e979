use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use crate::atlas::Atlas;
use crate::config::Config;

const AFFINE_PROGRAM: &str = "reg_aladin";
const FREEFORM_PROGRAM: &str = "reg_f3d";
const SEGMENTATION_PROGRAM: &str = "reg_resample";

/// Nearest neighbour, so labels are not blended when resampling the atlas.
const SEGMENTATION_INTERPOLATION_ORDER: i64 = 0;

/// Value of a command line option.
///
/// Floats always render with a fractional part (`-1.0`, `0.95`), integers
/// render plainly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// `(flag, value)` pair such as `-ln 6`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamPair {
    pub flag: &'static str,
    pub value: ParamValue,
}

impl ParamPair {
    pub fn new(flag: &'static str, value: impl Into<ParamValue>) -> Self {
        Self {
            flag,
            value: value.into(),
        }
    }
}

/// Flatten pairs into argument tokens.
pub fn param_args(pairs: &[ParamPair]) -> Vec<OsString> {
    pairs
        .iter()
        .flat_map(|pair| [OsString::from(pair.flag), OsString::from(pair.value.to_string())])
        .collect()
}

/// Render pairs as `flag value flag value`.
pub fn format_param_pairs(pairs: &[ParamPair]) -> String {
    pairs
        .iter()
        .map(|pair| format!("{} {}", pair.flag, pair.value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Everything the registration binaries need, resolved once from the
/// configuration and the atlas.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationParams {
    pub affine_program: PathBuf,
    pub freeform_program: PathBuf,
    pub segmentation_program: PathBuf,

    pub affine_pyramid_steps: ParamPair,
    pub affine_used_pyramid_steps: ParamPair,

    pub freeform_pyramid_steps: ParamPair,
    pub freeform_used_pyramid_steps: ParamPair,
    pub freeform_grid_spacing_x: ParamPair,
    pub bending_energy_penalty_weight: ParamPair,
    pub reference_smoothing_sigma: ParamPair,
    pub floating_smoothing_sigma: ParamPair,
    pub reference_histo_n_bins: ParamPair,
    pub floating_histo_n_bins: ParamPair,

    pub segmentation_interpolation_order: ParamPair,

    pub atlas_path: PathBuf,
    pub atlas_brain_path: PathBuf,
    pub hemispheres_path: PathBuf,

    /// Atlas voxel size in mm
    pub atlas_pixel_sizes: (f64, f64, f64),
}

fn program(configured: &str, default_name: &str) -> PathBuf {
    if configured.is_empty() {
        PathBuf::from(default_name)
    } else {
        PathBuf::from(configured)
    }
}

impl RegistrationParams {
    pub fn new(config: &Config, atlas: &Atlas) -> Self {
        let freeform = &config.freeform;
        Self {
            affine_program: program(&config.affine.program_path, AFFINE_PROGRAM),
            freeform_program: program(&freeform.program_path, FREEFORM_PROGRAM),
            segmentation_program: program(&config.segmentation.program_path, SEGMENTATION_PROGRAM),

            affine_pyramid_steps: ParamPair::new("-ln", config.affine.n_steps),
            affine_used_pyramid_steps: ParamPair::new("-lp", config.affine.use_n_steps),

            freeform_pyramid_steps: ParamPair::new("-ln", freeform.n_steps),
            freeform_used_pyramid_steps: ParamPair::new("-lp", freeform.use_n_steps),
            freeform_grid_spacing_x: ParamPair::new("-sx", freeform.grid_spacing.x),
            bending_energy_penalty_weight: ParamPair::new("-be", freeform.bending_energy_weight),
            reference_smoothing_sigma: ParamPair::new(
                "-smooR",
                freeform.smoothing_sigma.reference,
            ),
            floating_smoothing_sigma: ParamPair::new("-smooF", freeform.smoothing_sigma.floating),
            reference_histo_n_bins: ParamPair::new("--rbn", freeform.histo_n_bins.reference),
            floating_histo_n_bins: ParamPair::new("--fbn", freeform.histo_n_bins.floating),

            segmentation_interpolation_order: ParamPair {
                flag: "-inter",
                value: ParamValue::Int(SEGMENTATION_INTERPOLATION_ORDER),
            },

            atlas_path: atlas.path(),
            atlas_brain_path: atlas.brain_path(),
            hemispheres_path: atlas.hemispheres_path(),
            atlas_pixel_sizes: atlas.pixel_sizes(),
        }
    }

    pub fn affine_params(&self) -> [ParamPair; 2] {
        [self.affine_pyramid_steps, self.affine_used_pyramid_steps]
    }

    pub fn freeform_params(&self) -> [ParamPair; 8] {
        [
            self.freeform_pyramid_steps,
            self.freeform_used_pyramid_steps,
            self.freeform_grid_spacing_x,
            self.bending_energy_penalty_weight,
            self.reference_smoothing_sigma,
            self.floating_smoothing_sigma,
            self.reference_histo_n_bins,
            self.floating_histo_n_bins,
        ]
    }

    pub fn segmentation_params(&self) -> [ParamPair; 1] {
        [self.segmentation_interpolation_order]
    }
}
