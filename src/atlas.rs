//! Reference atlas files and the slice range mask used to restrict
//! registration to part of the atlas.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis, s};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codecs::{self, CodecError, VolumeFile};
use crate::config::{AtlasConfig, expand_home};
use crate::enums::Orientation;
use crate::orientation::OrientationError;
use crate::volume::{Affine, IDENTITY_AFFINE, UNIT_SPACING};
use crate::voxel::Voxel;

/// Axis of the horizontal atlas along which slices are masked.
pub const MASK_AXIS: Axis = Axis(1);

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Invalid slice range {start}..{end} for an axis of {extent} slices")]
    InvalidSliceRange {
        start: usize,
        end: usize,
        extent: usize,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Half open range `[start, end)` of atlas slices kept for registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceRange {
    pub start: usize,
    pub end: usize,
}

impl SliceRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Build a binary mask with the shape of `atlas`: `u16::MAX` inside the
/// slice range along [`MASK_AXIS`], 0 elsewhere. `end` is clamped to the
/// axis extent.
///
/// # Errors
///
/// [`MaskError::InvalidSliceRange`] if the clamped range is empty
pub fn mask_atlas<T: Voxel>(atlas: &Array3<T>, range: SliceRange) -> Result<Array3<u16>, MaskError> {
    let extent = atlas.len_of(MASK_AXIS);
    let end = range.end.min(extent);
    if range.start >= end {
        return Err(MaskError::InvalidSliceRange {
            start: range.start,
            end: range.end,
            extent,
        });
    }

    let mut mask = Array3::<u16>::zeros(atlas.raw_dim());
    mask.slice_mut(s![.., range.start..end, ..]).fill(u16::MAX);
    Ok(mask)
}

/// Read the atlas at `atlas_path`, mask it and save the mask to `mask_path`
/// with the atlas spacing.
pub fn make_atlas_mask(
    atlas_path: &Path,
    mask_path: &Path,
    range: SliceRange,
) -> Result<(), MaskError> {
    let atlas = codecs::read_nifti::<u32>(atlas_path)?;
    let mask = mask_atlas(atlas.data(), range)?;
    info!(
        start = range.start,
        end = range.end,
        path = %mask_path.display(),
        "Writing atlas mask"
    );
    codecs::write_nifti(
        mask_path,
        &mask,
        atlas.spacing.unwrap_or(UNIT_SPACING),
        atlas.affine.as_ref().unwrap_or(&IDENTITY_AFFINE),
    )?;
    Ok(())
}

/// Resolves the paths of the atlas files from the configuration.
///
/// The voxel size is read from the atlas header the first time it is asked
/// for and cached for the lifetime of the value.
#[derive(Debug)]
pub struct Atlas {
    config: AtlasConfig,
    pixel_sizes: OnceCell<(f64, f64, f64)>,
}

impl Atlas {
    /// # Errors
    ///
    /// Only horizontal atlases are supported
    pub fn new(config: AtlasConfig) -> Result<Self, OrientationError> {
        if config.orientation != Orientation::Horizontal {
            return Err(OrientationError::UnsupportedAtlasOrientation(
                config.orientation,
            ));
        }
        Ok(Self {
            config,
            pixel_sizes: OnceCell::new(),
        })
    }

    pub fn orientation(&self) -> Orientation {
        self.config.orientation
    }

    /// Label volume
    pub fn path(&self) -> PathBuf {
        self.element_path_or_default(&self.config.atlas_path, &self.config.default_atlas_name)
    }

    /// Average brain the sample is registered against
    pub fn brain_path(&self) -> PathBuf {
        self.element_path_or_default(&self.config.brain_path, &self.config.default_brain_name)
    }

    pub fn hemispheres_path(&self) -> PathBuf {
        self.element_path_or_default(
            &self.config.hemispheres_path,
            &self.config.default_hemispheres_name,
        )
    }

    pub fn outlines_path(&self) -> PathBuf {
        self.element_path_or_default(
            &self.config.outlines_path,
            &self.config.default_outlines_name,
        )
    }

    pub fn default_path(&self) -> PathBuf {
        self.element_path(&self.config.default_atlas_name)
    }

    /// Voxel size in mm from the configuration.
    pub fn pixel_sizes_from_config(&self) -> (f64, f64, f64) {
        self.config.pixel_size.as_tuple()
    }

    /// Voxel size in mm, from the atlas header when it has one, otherwise
    /// from the configuration.
    pub fn pixel_sizes(&self) -> (f64, f64, f64) {
        *self.pixel_sizes.get_or_init(|| {
            let path = self.path();
            match VolumeFile::open(&path) {
                Ok(file) => {
                    let (x, y, z) = file.spacing();
                    if x > 0.0 && y > 0.0 && z > 0.0 {
                        debug!(x, y, z, "Atlas voxel size from header");
                        (f64::from(x), f64::from(y), f64::from(z))
                    } else {
                        self.pixel_sizes_from_config()
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "Could not read atlas header, using configured voxel size");
                    self.pixel_sizes_from_config()
                }
            }
        })
    }

    /// Diagonal scaling matrix of the atlas voxel size.
    pub fn scale_transformation_matrix(&self) -> Affine {
        let (x, y, z) = self.pixel_sizes();
        let mut matrix = IDENTITY_AFFINE;
        matrix[0][0] = x as f32;
        matrix[1][1] = y as f32;
        matrix[2][2] = z as f32;
        matrix
    }

    fn element_path(&self, file_name: &str) -> PathBuf {
        absolute(&expand_home(&self.config.base_folder).join(file_name))
    }

    fn element_path_or_default(&self, explicit: &str, default_name: &str) -> PathBuf {
        if explicit.is_empty() {
            self.element_path(default_name)
        } else {
            absolute(&expand_home(explicit))
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PixelSize;
    use tempfile::tempdir;

    fn config_in(folder: &Path) -> AtlasConfig {
        AtlasConfig {
            base_folder: folder.display().to_string(),
            ..AtlasConfig::default()
        }
    }

    #[test]
    fn mask_keeps_the_range() {
        let atlas = Array3::<u32>::from_elem((2, 6, 3), 7);
        let mask = mask_atlas(&atlas, SliceRange::new(2, 4)).unwrap();
        assert_eq!(mask.dim(), (2, 6, 3));
        for ((_, j, _), &value) in mask.indexed_iter() {
            let expected = if (2..4).contains(&j) { u16::MAX } else { 0 };
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn mask_end_is_clamped() {
        let atlas = Array3::<u8>::zeros((1, 5, 1));
        let mask = mask_atlas(&atlas, SliceRange::new(3, 100)).unwrap();
        assert_eq!(
            mask.iter().copied().collect::<Vec<_>>(),
            vec![0, 0, 0, u16::MAX, u16::MAX]
        );
    }

    #[test]
    fn empty_range_is_rejected() {
        let atlas = Array3::<u8>::zeros((1, 5, 1));
        assert!(matches!(
            mask_atlas(&atlas, SliceRange::new(3, 3)),
            Err(MaskError::InvalidSliceRange { .. })
        ));
        assert!(matches!(
            mask_atlas(&atlas, SliceRange::new(5, 9)),
            Err(MaskError::InvalidSliceRange { extent: 5, .. })
        ));
    }

    #[test]
    fn non_horizontal_atlas_is_rejected() {
        let config = AtlasConfig {
            orientation: Orientation::Coronal,
            ..AtlasConfig::default()
        };
        assert!(matches!(
            Atlas::new(config),
            Err(OrientationError::UnsupportedAtlasOrientation(Orientation::Coronal))
        ));
    }

    #[test]
    fn paths_default_to_the_base_folder() {
        let dir = tempdir().unwrap();
        let atlas = Atlas::new(config_in(dir.path())).unwrap();
        assert_eq!(
            atlas.brain_path(),
            dir.path()
                .join("allen_cff_october_2016_average_brain_filtered_10_um.nii")
        );
        assert_eq!(atlas.path(), atlas.default_path());
    }

    #[test]
    fn explicit_paths_win() {
        let config = AtlasConfig {
            atlas_path: "/home/lambda/amap/atlas.nii".to_string(),
            ..AtlasConfig::default()
        };
        let atlas = Atlas::new(config).unwrap();
        assert_eq!(atlas.path(), PathBuf::from("/home/lambda/amap/atlas.nii"));
        assert_ne!(atlas.path(), atlas.default_path());
    }

    #[test]
    fn pixel_sizes_fall_back_to_config() {
        let dir = tempdir().unwrap();
        let config = AtlasConfig {
            pixel_size: PixelSize {
                x: 0.025,
                y: 0.025,
                z: 0.05,
            },
            ..config_in(dir.path())
        };
        let atlas = Atlas::new(config).unwrap();
        assert_eq!(atlas.pixel_sizes(), (0.025, 0.025, 0.05));
        let matrix = atlas.scale_transformation_matrix();
        assert_eq!(matrix[2][2], 0.05);
        assert_eq!(matrix[3][3], 1.0);
    }

    #[test]
    fn pixel_sizes_come_from_the_header() {
        let dir = tempdir().unwrap();
        let atlas = Atlas::new(config_in(dir.path())).unwrap();
        codecs::write_nifti(
            &atlas.path(),
            &Array3::<u32>::zeros((2, 2, 2)),
            (0.02, 0.02, 0.02),
            &IDENTITY_AFFINE,
        )
        .unwrap();

        let (x, y, z) = atlas.pixel_sizes();
        assert!((x - 0.02).abs() < 1e-6 && (y - 0.02).abs() < 1e-6 && (z - 0.02).abs() < 1e-6);
    }

    #[test]
    fn atlas_mask_file_has_the_atlas_shape() {
        let dir = tempdir().unwrap();
        let atlas_path = dir.path().join("atlas.nii");
        let mask_path = dir.path().join("mask.nii");
        codecs::write_nifti(
            &atlas_path,
            &Array3::<u32>::from_elem((3, 4, 2), 9),
            (0.01, 0.01, 0.01),
            &IDENTITY_AFFINE,
        )
        .unwrap();

        make_atlas_mask(&atlas_path, &mask_path, SliceRange::new(1, 3)).unwrap();
        let mask = codecs::read_nifti::<u16>(&mask_path).unwrap();
        assert_eq!(mask.dim(), (3, 4, 2));
        assert_eq!(mask.data()[[0, 0, 0]], 0);
        assert_eq!(mask.data()[[0, 1, 0]], u16::MAX);
        assert_eq!(mask.data()[[2, 3, 1]], 0);
    }
}
