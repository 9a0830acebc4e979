//! Axis permutations between the sample's native orientation and the
//! horizontal orientation of the atlas.

use thiserror::Error;

use crate::enums::Orientation;
use crate::volume::Volume;
use crate::voxel::Voxel;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrientationError {
    #[error("Unsupported atlas orientation {0}, only horizontal is supported")]
    UnsupportedAtlasOrientation(Orientation),
}

#[derive(Clone, Copy, Debug)]
pub struct OrientationTransposer {
    native: Orientation,
}

impl OrientationTransposer {
    /// # Errors
    ///
    /// Only a horizontal atlas is supported
    pub fn new(native: Orientation, atlas: Orientation) -> Result<Self, OrientationError> {
        if atlas != Orientation::Horizontal {
            return Err(OrientationError::UnsupportedAtlasOrientation(atlas));
        }
        Ok(Self { native })
    }

    pub fn to_atlas_axes(native: Orientation) -> [usize; 3] {
        match native {
            Orientation::Horizontal => [1, 0, 2],
            Orientation::Coronal => [1, 2, 0],
            Orientation::Sagittal => [2, 1, 0],
        }
    }

    pub fn to_native_axes(native: Orientation) -> [usize; 3] {
        match native {
            Orientation::Horizontal => [1, 0, 2],
            Orientation::Coronal => [2, 0, 1],
            Orientation::Sagittal => [2, 1, 0],
        }
    }

    pub fn to_atlas<T: Voxel>(&self, volume: Volume<T>) -> Volume<T> {
        volume.permuted(Self::to_atlas_axes(self.native))
    }

    pub fn to_native<T: Voxel>(&self, volume: Volume<T>) -> Volume<T> {
        volume.permuted(Self::to_native_axes(self.native))
    }
}

/// Compose two permutations the way applying `first` then `second` to an
/// array does: axis `i` of the result is axis `first[second[i]]` of the input.
pub fn compose(first: [usize; 3], second: [usize; 3]) -> [usize; 3] {
    [first[second[0]], first[second[1]], first[second[2]]]
}
