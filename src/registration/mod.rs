//! Registration of the atlas onto a preprocessed sample.
//!
//! The atlas average brain is registered to the sample with an affine then a
//! freeform transform, and the resulting deformation is propagated to the
//! atlas labels. Each step shells out to one of the registration binaries,
//! with its output captured to `<sample>_<step>.log` / `.err` in the output
//! folder. Steps must run in order:
//!
//! ```text
//! Created -> [AtlasMasked] -> AffineRegistered -> FreeformRegistered
//!     -> Segmented -> [HemispheresSegmented] -> [OutlinesGenerated] -> Done
//! ```

mod params;

pub use params::{ParamPair, ParamValue, RegistrationParams, format_param_pairs, param_args};

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::atlas::{MaskError, SliceRange, make_atlas_mask};
use crate::codecs::{self, CodecError};
use crate::outlines::outline_labels;
use crate::run_command::{CommandError, CommandLine, run_command};
use crate::volume::{IDENTITY_AFFINE, UNIT_SPACING};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegistrationStage {
    Created,
    AtlasMasked,
    AffineRegistered,
    FreeformRegistered,
    Segmented,
    HemispheresSegmented,
    OutlinesGenerated,
    Done,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::AtlasMasked => "atlas masked",
            Self::AffineRegistered => "affine registered",
            Self::FreeformRegistered => "freeform registered",
            Self::Segmented => "segmented",
            Self::HemispheresSegmented => "hemispheres segmented",
            Self::OutlinesGenerated => "outlines generated",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Atlas masking failed; {0}")]
    Mask(#[source] MaskError),

    #[error("Affine registration failed; {0}")]
    Affine(#[source] CommandError),

    #[error("Freeform registration failed; {0}")]
    Freeform(#[source] CommandError),

    #[error("Segmentation failed; {0}")]
    Segmentation(#[source] CommandError),

    #[error("Hemispheres segmentation failed; {0}")]
    HemisphereSegmentation(#[source] CommandError),

    #[error("Outlines generation failed; {0}")]
    Outlines(#[source] CodecError),

    #[error("Cannot run {step} while {stage}")]
    OutOfOrder {
        step: &'static str,
        stage: RegistrationStage,
    },
}

pub type Result<T> = std::result::Result<T, RegistrationError>;

/// The files of one registration run. Every path is derived from the sample
/// name and the output folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationRun {
    pub sample_name: String,
    pub output_folder: PathBuf,
    /// Preprocessed sample, the reference image of every step
    pub dataset_path: PathBuf,
    /// Set once an atlas mask has been written
    pub atlas_mask_path: Option<PathBuf>,

    pub affine_registered_path: PathBuf,
    pub freeform_registered_path: PathBuf,
    pub registered_atlas_path: PathBuf,
    pub registered_hemispheres_path: PathBuf,
    pub affine_matrix_path: PathBuf,
    pub control_point_file_path: PathBuf,
    pub outlines_path: PathBuf,

    pub affine_log_path: PathBuf,
    pub affine_err_path: PathBuf,
    pub freeform_log_path: PathBuf,
    pub freeform_err_path: PathBuf,
    pub segmentation_log_path: PathBuf,
    pub segmentation_err_path: PathBuf,
}

impl RegistrationRun {
    pub fn new(
        sample_name: impl Into<String>,
        dataset_path: impl Into<PathBuf>,
        output_folder: impl Into<PathBuf>,
    ) -> Self {
        let sample_name = sample_name.into();
        let output_folder = output_folder.into();
        let make_path = |suffix: &str| output_folder.join(format!("{sample_name}_{suffix}"));

        Self {
            dataset_path: dataset_path.into(),
            atlas_mask_path: None,

            affine_registered_path: make_path("affine_registered_atlas_brain.nii"),
            freeform_registered_path: make_path("freeform_registered_atlas_brain.nii"),
            registered_atlas_path: make_path("registered_atlas.nii"),
            registered_hemispheres_path: make_path("registered_hemispheres.nii"),
            affine_matrix_path: make_path("affine_matrix.txt"),
            control_point_file_path: make_path("control_point_file.nii"),
            outlines_path: make_path("outlines.nii"),

            affine_log_path: make_path("affine.log"),
            affine_err_path: make_path("affine.err"),
            freeform_log_path: make_path("freeform.log"),
            freeform_err_path: make_path("freeform.err"),
            segmentation_log_path: make_path("segment.log"),
            segmentation_err_path: make_path("segment.err"),

            sample_name,
            output_folder,
        }
    }

    /// `<output_folder>/<sample_name>_<suffix>`
    pub fn make_path(&self, suffix: &str) -> PathBuf {
        self.output_folder
            .join(format!("{}_{suffix}", self.sample_name))
    }

    /// Where the atlas mask is written when one is requested.
    pub fn atlas_mask_destination(&self) -> PathBuf {
        self.make_path("atlas_mask.nii")
    }

    /// Images only needed while the registration runs.
    pub fn intermediate_files(&self, preprocessed_suffix: &str) -> Vec<PathBuf> {
        vec![
            self.make_path(&format!("{preprocessed_suffix}.nii")),
            self.affine_registered_path.clone(),
            self.freeform_registered_path.clone(),
        ]
    }

    pub fn log_files(&self) -> Vec<PathBuf> {
        vec![
            self.affine_log_path.clone(),
            self.freeform_log_path.clone(),
            self.segmentation_log_path.clone(),
        ]
    }

    pub fn error_files(&self) -> Vec<PathBuf> {
        vec![
            self.affine_err_path.clone(),
            self.freeform_err_path.clone(),
            self.segmentation_err_path.clone(),
        ]
    }
}

/// Optional steps of [`BrainRegistration::run_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Restrict the registration to this range of atlas slices
    pub atlas_mask: Option<SliceRange>,
    /// Also propagate the transform to the hemispheres atlas
    pub hemispheres: bool,
    pub outlines: bool,
}

/// Drives the registration steps for one run, enforcing their order.
#[derive(Debug)]
pub struct BrainRegistration {
    params: RegistrationParams,
    run: RegistrationRun,
    stage: RegistrationStage,
}

impl BrainRegistration {
    pub fn new(params: RegistrationParams, run: RegistrationRun) -> Self {
        Self {
            params,
            run,
            stage: RegistrationStage::Created,
        }
    }

    pub fn stage(&self) -> RegistrationStage {
        self.stage
    }

    pub fn params(&self) -> &RegistrationParams {
        &self.params
    }

    pub fn run(&self) -> &RegistrationRun {
        &self.run
    }

    fn require(&self, step: &'static str, allowed: &[RegistrationStage]) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(RegistrationError::OutOfOrder {
                step,
                stage: self.stage,
            })
        }
    }

    /// Write a mask keeping only `range` of the atlas slices; the affine and
    /// freeform steps then pass it as the floating image mask.
    pub fn mask_atlas(&mut self, range: SliceRange) -> Result<()> {
        self.require("atlas masking", &[RegistrationStage::Created])?;
        let mask_path = self.run.atlas_mask_destination();
        make_atlas_mask(&self.params.atlas_path, &mask_path, range)
            .map_err(RegistrationError::Mask)?;
        self.run.atlas_mask_path = Some(mask_path);
        self.stage = RegistrationStage::AtlasMasked;
        Ok(())
    }

    pub fn prepare_affine_command(&self) -> CommandLine {
        let command = CommandLine::new(&self.params.affine_program)
            .args(param_args(&self.params.affine_params()))
            .option("-flo", &self.params.atlas_brain_path)
            .option("-ref", &self.run.dataset_path)
            .option("-aff", &self.run.affine_matrix_path)
            .option("-res", &self.run.affine_registered_path);
        self.with_mask(command)
    }

    pub fn prepare_freeform_command(&self) -> CommandLine {
        let command = CommandLine::new(&self.params.freeform_program)
            .args(param_args(&self.params.freeform_params()))
            .option("-aff", &self.run.affine_matrix_path)
            .option("-flo", &self.params.atlas_brain_path)
            .option("-ref", &self.run.dataset_path)
            .option("-cpp", &self.run.control_point_file_path)
            .option("-res", &self.run.freeform_registered_path);
        self.with_mask(command)
    }

    /// Propagate the freeform transform to `floating_path`.
    pub fn prepare_segmentation_command(&self, floating_path: &Path, dest_path: &Path) -> CommandLine {
        CommandLine::new(&self.params.segmentation_program)
            .args(param_args(&self.params.segmentation_params()))
            .option("-cpp", &self.run.control_point_file_path)
            .option("-flo", floating_path)
            .option("-ref", &self.run.dataset_path)
            .option("-res", dest_path)
    }

    fn with_mask(&self, command: CommandLine) -> CommandLine {
        match &self.run.atlas_mask_path {
            Some(mask_path) => command.option("-fmask", mask_path),
            None => command,
        }
    }

    /// Affine registration of the atlas average brain to the sample.
    pub fn register_affine(&mut self) -> Result<()> {
        self.require(
            "affine registration",
            &[RegistrationStage::Created, RegistrationStage::AtlasMasked],
        )?;
        info!("Starting affine registration");
        run_command(
            &self.prepare_affine_command(),
            Some(self.run.affine_log_path.as_path()),
            Some(self.run.affine_err_path.as_path()),
        )
        .map_err(RegistrationError::Affine)?;
        self.stage = RegistrationStage::AffineRegistered;
        Ok(())
    }

    /// Freeform (elastic) registration, starting from the affine transform.
    pub fn register_freeform(&mut self) -> Result<()> {
        self.require("freeform registration", &[RegistrationStage::AffineRegistered])?;
        info!("Starting freeform registration");
        run_command(
            &self.prepare_freeform_command(),
            Some(self.run.freeform_log_path.as_path()),
            Some(self.run.freeform_err_path.as_path()),
        )
        .map_err(RegistrationError::Freeform)?;
        self.stage = RegistrationStage::FreeformRegistered;
        Ok(())
    }

    /// Resample the atlas labels into the sample space.
    pub fn segment(&mut self) -> Result<()> {
        self.require("segmentation", &[RegistrationStage::FreeformRegistered])?;
        info!("Starting segmentation");
        let command = self.prepare_segmentation_command(
            &self.params.atlas_path,
            &self.run.registered_atlas_path,
        );
        run_command(
            &command,
            Some(self.run.segmentation_log_path.as_path()),
            Some(self.run.segmentation_err_path.as_path()),
        )
        .map_err(RegistrationError::Segmentation)?;
        self.stage = RegistrationStage::Segmented;
        Ok(())
    }

    /// Resample the hemispheres atlas into the sample space. Shares the
    /// segmentation log files.
    pub fn register_hemispheres(&mut self) -> Result<()> {
        self.require("hemispheres segmentation", &[RegistrationStage::Segmented])?;
        info!("Segmenting hemispheres");
        let command = self.prepare_segmentation_command(
            &self.params.hemispheres_path,
            &self.run.registered_hemispheres_path,
        );
        run_command(
            &command,
            Some(self.run.segmentation_log_path.as_path()),
            Some(self.run.segmentation_err_path.as_path()),
        )
        .map_err(RegistrationError::HemisphereSegmentation)?;
        self.stage = RegistrationStage::HemispheresSegmented;
        Ok(())
    }

    /// Save the region boundaries of the registered atlas, keeping its voxel
    /// size.
    pub fn generate_outlines(&mut self) -> Result<()> {
        self.require(
            "outlines generation",
            &[
                RegistrationStage::Segmented,
                RegistrationStage::HemispheresSegmented,
            ],
        )?;
        info!("Generating outlines");
        let registered = codecs::read_nifti::<u32>(&self.run.registered_atlas_path)
            .map_err(RegistrationError::Outlines)?;
        let outlines = outline_labels(registered.data());
        codecs::write_nifti(
            &self.run.outlines_path,
            &outlines,
            registered.spacing.unwrap_or(UNIT_SPACING),
            registered.affine.as_ref().unwrap_or(&IDENTITY_AFFINE),
        )
        .map_err(RegistrationError::Outlines)?;
        self.stage = RegistrationStage::OutlinesGenerated;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.require(
            "finishing",
            &[
                RegistrationStage::Segmented,
                RegistrationStage::HemispheresSegmented,
                RegistrationStage::OutlinesGenerated,
            ],
        )?;
        self.stage = RegistrationStage::Done;
        Ok(())
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// Returns the path of the registered atlas.
    pub fn run_all(&mut self, options: RegistrationOptions) -> Result<PathBuf> {
        if let Some(range) = options.atlas_mask {
            self.mask_atlas(range)?;
        }
        self.register_affine()?;
        self.register_freeform()?;
        self.segment()?;
        if options.hemispheres {
            self.register_hemispheres()?;
        }
        if options.outlines {
            self.generate_outlines()?;
        }
        self.finish()?;
        Ok(self.run.registered_atlas_path.clone())
    }
}
