use std::path::{Path, PathBuf};

use ndarray::Axis;
use thiserror::Error;
use tracing::debug;

use crate::codecs::{self, CodecError};
use crate::volume::{Affine, IDENTITY_AFFINE, UNIT_SPACING, Volume};
use crate::volume_loader::{LoaderOptions, ScalingFactors, VolumeLoader, VolumeLoaderError};
use crate::voxel::Voxel;

#[derive(Debug, Error)]
pub enum VolumeWriterError {
    #[error("Path is expected to end in {expected}, got {} instead", .path.display())]
    OutputFormatMismatch { path: PathBuf, expected: &'static str },

    #[error("Not enough padding digits {pad_width} for {n_planes} planes")]
    PaddingOverflow { pad_width: usize, n_planes: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Load(#[from] VolumeLoaderError),
}

pub type Result<T> = std::result::Result<T, VolumeWriterError>;

fn has_suffix(path: &Path, suffixes: &[&str]) -> bool {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

pub struct VolumeWriter;

impl VolumeWriter {
    /// Write `volume` as a NIfTI file.
    ///
    /// `spacing` is only applied when it differs from `(1, 1, 1)`; otherwise
    /// the spacing already carried by the volume (if any) is kept. The affine
    /// is stored as the sform and defaults to identity.
    pub fn to_nifti<T: Voxel>(
        volume: &Volume<T>,
        dest_path: impl AsRef<Path>,
        spacing: (f32, f32, f32),
        affine: Option<&Affine>,
    ) -> Result<()> {
        let dest_path = dest_path.as_ref();
        if !has_suffix(dest_path, &[".nii", ".nii.gz"]) {
            return Err(VolumeWriterError::OutputFormatMismatch {
                path: dest_path.to_path_buf(),
                expected: "\".nii\" or \".nii.gz\"",
            });
        }

        // TODO: only keep the existing spacing when it is non-trivial and warn
        // when the caller asks to replace it
        let spacing = if spacing != UNIT_SPACING {
            spacing
        } else {
            volume.spacing.unwrap_or(UNIT_SPACING)
        };
        let affine = affine.or(volume.affine.as_ref()).unwrap_or(&IDENTITY_AFFINE);

        debug!(path = %dest_path.display(), ?spacing, "Writing NIfTI volume");
        codecs::write_nifti(dest_path, volume.data(), spacing, affine)?;
        Ok(())
    }

    /// Save the volume as a single multi-page TIFF, one page per plane.
    pub fn to_tiff_stack<T: Voxel>(volume: &Volume<T>, dest_path: impl AsRef<Path>) -> Result<()> {
        let dest_path = dest_path.as_ref();
        if !has_suffix(dest_path, &[".tif", ".tiff"]) {
            return Err(VolumeWriterError::OutputFormatMismatch {
                path: dest_path.to_path_buf(),
                expected: "\".tif\" or \".tiff\"",
            });
        }
        codecs::write_tiff_pages(dest_path, volume.data().axis_iter(Axis(2)))?;
        Ok(())
    }

    /// Save the volume as a sequence of single plane TIFF files named
    /// `<prefix>_<zero padded index><suffix>.tif`.
    ///
    /// Returns the written paths in plane order.
    pub fn to_tiff_sequence<T: Voxel>(
        volume: &Volume<T>,
        path_prefix: impl AsRef<Path>,
        path_suffix: &str,
        pad_width: usize,
    ) -> Result<Vec<PathBuf>> {
        let n_planes = volume.n_planes();
        let capacity = u32::try_from(pad_width)
            .ok()
            .and_then(|width| 10usize.checked_pow(width))
            .unwrap_or(usize::MAX);
        if n_planes > capacity {
            return Err(VolumeWriterError::PaddingOverflow {
                pad_width,
                n_planes,
            });
        }

        let prefix = path_prefix.as_ref().as_os_str().to_string_lossy();
        let mut written = Vec::with_capacity(n_planes);
        for (index, plane) in volume.data().axis_iter(Axis(2)).enumerate() {
            let dest_path = PathBuf::from(format!(
                "{prefix}_{index:0pad_width$}{path_suffix}.tif"
            ));
            codecs::write_tiff_pages(&dest_path, std::iter::once(plane))?;
            written.push(dest_path);
        }
        Ok(written)
    }

    /// Load any TIFF based source and save it as a gzipped NIfTI file.
    pub fn tiff_to_nifti<T: Voxel>(
        src_path: impl AsRef<Path>,
        dest_path: impl AsRef<Path>,
        options: &LoaderOptions,
    ) -> Result<()> {
        let dest_path = dest_path.as_ref();
        if !has_suffix(dest_path, &[".nii.gz"]) {
            return Err(VolumeWriterError::OutputFormatMismatch {
                path: dest_path.to_path_buf(),
                expected: "\".nii.gz\"",
            });
        }

        let volume = VolumeLoader::load::<T>(src_path, ScalingFactors::IDENTITY, options)?;
        Self::to_nifti(&volume, dest_path, UNIT_SPACING, None)
    }

    /// Load a NIfTI file and save it as a single TIFF stack.
    pub fn nifti_to_tiff<T: Voxel>(
        src_path: impl AsRef<Path>,
        dest_path: impl AsRef<Path>,
    ) -> Result<()> {
        let volume = VolumeLoader::open_volumetric(src_path)?.read::<T>()?;
        Self::to_tiff_stack(&volume, dest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::tempdir;

    fn volume() -> Volume<u16> {
        Volume::new(Array3::from_shape_fn((4, 4, 12), |(i, j, k)| (i + j * 4 + k * 16) as u16))
    }

    #[test]
    fn padding_width_limits_plane_count() {
        let dir = tempdir().unwrap();
        let err = VolumeWriter::to_tiff_sequence(&volume(), dir.path().join("p"), "", 1).unwrap_err();
        assert!(matches!(
            err,
            VolumeWriterError::PaddingOverflow {
                pad_width: 1,
                n_planes: 12
            }
        ));
    }

    #[test]
    fn sequence_names_are_zero_padded() {
        let dir = tempdir().unwrap();
        let written =
            VolumeWriter::to_tiff_sequence(&volume(), dir.path().join("brain"), "_ch0", 4).unwrap();
        assert_eq!(written.len(), 12);
        assert_eq!(written[0], dir.path().join("brain_0000_ch0.tif"));
        assert_eq!(written[11], dir.path().join("brain_0011_ch0.tif"));
    }

    #[test]
    fn wrong_extensions_are_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            VolumeWriter::to_nifti(&volume(), dir.path().join("v.tif"), UNIT_SPACING, None),
            Err(VolumeWriterError::OutputFormatMismatch { .. })
        ));
        assert!(matches!(
            VolumeWriter::to_tiff_stack(&volume(), dir.path().join("v.nii")),
            Err(VolumeWriterError::OutputFormatMismatch { .. })
        ));
        assert!(matches!(
            VolumeWriter::tiff_to_nifti::<u16>(
                dir.path().join("v.tif"),
                dir.path().join("v.nii"),
                &LoaderOptions::default()
            ),
            Err(VolumeWriterError::OutputFormatMismatch { .. })
        ));
    }

    #[test]
    fn unit_spacing_keeps_the_volume_spacing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.nii");
        let volume = volume().with_spacing((0.01, 0.01, 0.05));
        VolumeWriter::to_nifti(&volume, &path, UNIT_SPACING, None).unwrap();
        let file = VolumeLoader::open_volumetric(&path).unwrap();
        assert_eq!(file.spacing(), (0.01, 0.01, 0.05));
    }
}
