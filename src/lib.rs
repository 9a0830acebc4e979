//! # volreg
//!
//! This crate prepares 3D fluorescence microscopy volumes of whole brains
//! for registration against a reference atlas, and drives the external
//! NiftyReg binaries (`reg_aladin`, `reg_f3d`, `reg_resample`) that perform
//! the registration itself.
//!
//! Samples can be loaded from:
//!  - a directory of 2D planes (one TIFF file per plane)
//!  - a text file listing one plane path per line
//!  - a single multi-page TIFF
//!  - a NIfTI file
//!
//! Planes are loaded in parallel with rayon when requested, under a check of
//! the memory available on the system. While loading, the sample is
//! resampled onto the voxel grid of the atlas: each plane is resized with
//! bilinear interpolation and the plane axis is resized linearly once the
//! volume is assembled.
//!
//! Before registration the sample is transposed to the (horizontal) atlas
//! orientation and filtered plane by plane with a despeckle opening and a
//! pseudo flat-field correction, which keeps the registration from fitting
//! fine details.
//!
//! Samples are assumed to be:
//!   - single channel
//!   - acquired as a stack of coronal, sagittal or horizontal planes
//!   - stored with the same sample type in every plane
//!
//! # Examples
//!
//! ## Preparing a sample
//!
//! Load a coronal stack of 1 x 1 x 5 µm planes, filter it and save it with
//! the atlas voxel size.
//!
//! ```no_run
//! # use volreg::{LoaderOptions, Orientation, SampleProcessor, SampleSpacing};
//! let spacing = SampleSpacing { x: 0.001, y: 0.001, z: 0.005 };
//! let sample = SampleProcessor::<u16>::load(
//!     "brain/planes",
//!     spacing,
//!     Orientation::Coronal,
//!     (0.01, 0.01, 0.01),
//!     &LoaderOptions::default(),
//! )
//! .expect("should have loaded the sample");
//! sample
//!     .filter()
//!     .save("output/brain_downsampled_filtered.nii")
//!     .expect("should have saved the filtered sample");
//! ```
//!
//! ## Registering the atlas
//!
//! ```no_run
//! # use volreg::{Atlas, BrainRegistration, RegistrationOptions, RegistrationParams, RegistrationRun};
//! # use volreg::config::load_config;
//! let config = load_config(None).expect("should have loaded a config").config;
//! let atlas = Atlas::new(config.atlas.clone()).expect("atlas should be horizontal");
//! let params = RegistrationParams::new(&config, &atlas);
//! let run = RegistrationRun::new("brain", "output/brain_downsampled_filtered.nii", "output");
//!
//! let mut registration = BrainRegistration::new(params, run);
//! let registered_atlas = registration
//!     .run_all(RegistrationOptions::default())
//!     .expect("should have registered the atlas");
//! println!("{}", registered_atlas.display());
//! ```

pub mod atlas;
pub mod codecs;
pub mod config;
pub mod enums;
pub mod filter;
mod interpolator;
pub mod orientation;
pub mod outlines;
pub mod processor;
pub mod registration;
pub mod run_command;
pub mod volume;
pub mod volume_loader;
pub mod volume_writer;
pub mod voxel;

pub use atlas::{Atlas, SliceRange};
pub use enums::{Orientation, SampleType, SortBy};
pub use processor::{SampleProcessor, SampleSpacing};
pub use registration::{
    BrainRegistration, RegistrationOptions, RegistrationParams, RegistrationRun, RegistrationStage,
};
pub use volume::Volume;
pub use volume_loader::{LoaderOptions, ScalingFactors, VolumeLoader};
pub use volume_writer::VolumeWriter;
