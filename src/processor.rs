//! Preparation of a sample before registration: downsampling onto the atlas
//! voxel grid, reorientation to the atlas axes and filtering.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::enums::Orientation;
use crate::filter::filter_for_registration;
use crate::orientation::{OrientationError, OrientationTransposer};
use crate::volume::{Affine, Volume};
use crate::volume_loader::{LoaderOptions, ScalingFactors, VolumeLoader, VolumeLoaderError};
use crate::volume_writer::{VolumeWriter, VolumeWriterError};
use crate::voxel::Voxel;

/// Scale of the affine written with preprocessed samples.
const SAVED_AFFINE_SCALE: f32 = 0.01;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Orientation(#[from] OrientationError),

    #[error(transparent)]
    Load(#[from] VolumeLoaderError),

    #[error(transparent)]
    Write(#[from] VolumeWriterError),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Voxel size of the sample in mm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleSpacing {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SampleSpacing {
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

/// A sample volume in atlas orientation and on the atlas voxel grid.
pub struct SampleProcessor<T: Voxel> {
    volume: Volume<T>,
    transposer: OrientationTransposer,
    atlas_pixel_sizes: (f64, f64, f64),
}

impl<T: Voxel> SampleProcessor<T> {
    /// Load the sample at `path` scaled to the atlas voxel size and transposed
    /// to the atlas orientation.
    pub fn load(
        path: impl AsRef<Path>,
        spacing: SampleSpacing,
        orientation: Orientation,
        atlas_pixel_sizes: (f64, f64, f64),
        options: &LoaderOptions,
    ) -> Result<Self> {
        let transposer = OrientationTransposer::new(orientation, Orientation::Horizontal)?;
        let scaling = ScalingFactors::from_spacing(spacing.as_tuple(), atlas_pixel_sizes);
        info!(
            x = scaling.x,
            y = scaling.y,
            z = scaling.z,
            "Loading sample"
        );
        let volume = VolumeLoader::load::<T>(path, scaling, options)?;
        Ok(Self::from_volume(volume, transposer, atlas_pixel_sizes))
    }

    /// Wrap a volume already on the atlas grid, still in its native
    /// orientation.
    pub fn from_volume(
        volume: Volume<T>,
        transposer: OrientationTransposer,
        atlas_pixel_sizes: (f64, f64, f64),
    ) -> Self {
        let volume = transposer.to_atlas(volume);
        Self {
            volume,
            transposer,
            atlas_pixel_sizes,
        }
    }

    pub fn volume(&self) -> &Volume<T> {
        &self.volume
    }

    /// Mirror the volume along the selected atlas axes.
    pub fn flip(&mut self, axes: (bool, bool, bool)) {
        self.volume.flip(axes);
    }

    /// Filter the planes along the native z axis and renormalise to 16 bits.
    pub fn filter(self) -> SampleProcessor<u16> {
        info!("Filtering sample");
        let native = self.transposer.to_native(self.volume);
        let filtered = Volume::new(filter_for_registration(native.data()));
        SampleProcessor {
            volume: self.transposer.to_atlas(filtered),
            transposer: self.transposer,
            atlas_pixel_sizes: self.atlas_pixel_sizes,
        }
    }

    /// The same sample converted to another voxel type.
    pub fn cast<U: Voxel>(&self) -> SampleProcessor<U> {
        SampleProcessor {
            volume: self.volume.cast(),
            transposer: self.transposer,
            atlas_pixel_sizes: self.atlas_pixel_sizes,
        }
    }

    /// Save as NIfTI with the atlas voxel size.
    pub fn save(&self, dest_path: impl AsRef<Path>) -> Result<()> {
        let (x, y, z) = self.atlas_pixel_sizes;
        let dest_path = dest_path.as_ref();
        info!(path = %dest_path.display(), "Saving sample");
        VolumeWriter::to_nifti(
            &self.volume,
            dest_path,
            (x as f32, y as f32, z as f32),
            Some(&saved_affine()),
        )?;
        Ok(())
    }
}

fn saved_affine() -> Affine {
    let mut affine = [[0.0; 4]; 4];
    for (i, row) in affine.iter_mut().enumerate() {
        row[i] = SAVED_AFFINE_SCALE;
    }
    affine
}
