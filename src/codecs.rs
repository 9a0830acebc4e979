//! Thin adapters between [`Volume`] and the on-disk formats: single or
//! multi-page TIFF (`tiff`), other raster planes (`image`) and NIfTI (`nifti`).

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayD, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{NiftiHeader, NiftiObject, NiftiType, ReaderOptions, ReaderStreamedOptions};
use thiserror::Error;
use tiff::ColorType;
use tiff::decoder::{Decoder, Limits};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::enums::SampleType;
use crate::volume::{Affine, Volume};
use crate::voxel::{Voxel, decoding_result_type, dynamic_image_type, tiff_sample_type};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TIFF error on {}: {source}", .path.display())]
    Tiff {
        path: PathBuf,
        source: tiff::TiffError,
    },

    #[error("Image error on {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("NIfTI error on {}: {source}", .path.display())]
    Nifti {
        path: PathBuf,
        source: nifti::NiftiError,
    },

    #[error("{} is not a single channel image", .path.display())]
    NotGrayscale { path: PathBuf },

    #[error("{} holds an unsupported sample type", .path.display())]
    UnsupportedSampleType { path: PathBuf },

    #[error("{} holds {found:?} samples, expected {expected:?}", .path.display())]
    SampleTypeMismatch {
        path: PathBuf,
        expected: SampleType,
        found: SampleType,
    },

    #[error("{} has pages of different shapes", .path.display())]
    InconsistentPages { path: PathBuf },

    #[error("{} has {ndim} dimensions, expected a 3D volume", .path.display())]
    NotAVolume { path: PathBuf, ndim: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Shape and sample type of a 2D plane, read without keeping its pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneInfo {
    /// (rows, columns)
    pub shape: (usize, usize),
    pub sample_type: SampleType,
}

impl PlaneInfo {
    pub fn byte_size(&self) -> usize {
        self.shape.0 * self.shape.1 * self.sample_type.byte_size()
    }
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CodecError + '_ {
    move |source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn tiff_error(path: &Path) -> impl FnOnce(tiff::TiffError) -> CodecError + '_ {
    move |source| CodecError::Tiff {
        path: path.to_path_buf(),
        source,
    }
}

fn nifti_error(path: &Path) -> impl FnOnce(nifti::NiftiError) -> CodecError + '_ {
    move |source| CodecError::Nifti {
        path: path.to_path_buf(),
        source,
    }
}

fn open_tiff(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(io_error(path))?;
    Ok(Decoder::new(BufReader::new(file))
        .map_err(tiff_error(path))?
        .with_limits(Limits::unlimited()))
}

fn decode_page<T: Voxel>(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<Array2<T>> {
    let (width, height) = decoder.dimensions().map_err(tiff_error(path))?;
    let color_type = decoder.colortype().map_err(tiff_error(path))?;
    if !matches!(color_type, ColorType::Gray(_)) {
        return Err(CodecError::NotGrayscale {
            path: path.to_path_buf(),
        });
    }

    let result = decoder.read_image().map_err(tiff_error(path))?;
    let found = decoding_result_type(&result).ok_or_else(|| CodecError::UnsupportedSampleType {
        path: path.to_path_buf(),
    })?;
    let samples = T::from_decoding_result(result).ok_or(CodecError::SampleTypeMismatch {
        path: path.to_path_buf(),
        expected: T::SAMPLE_TYPE,
        found,
    })?;

    Array2::from_shape_vec((height as usize, width as usize), samples).map_err(|_| {
        CodecError::InconsistentPages {
            path: path.to_path_buf(),
        }
    })
}

/// Report the shape and sample type of the first plane of `path`.
///
/// TIFF planes are described from their tags alone; other rasters are decoded.
pub fn peek_plane(path: &Path) -> Result<PlaneInfo> {
    if is_tiff(path) {
        let mut decoder = open_tiff(path)?;
        let (width, height) = decoder.dimensions().map_err(tiff_error(path))?;
        let ColorType::Gray(bits) = decoder.colortype().map_err(tiff_error(path))? else {
            return Err(CodecError::NotGrayscale {
                path: path.to_path_buf(),
            });
        };
        // Absent SampleFormat means unsigned integers
        let sample_format = decoder
            .find_tag(Tag::SampleFormat)
            .map_err(tiff_error(path))?
            .map(|value| value.into_u16())
            .transpose()
            .map_err(tiff_error(path))?
            .unwrap_or(1);
        let sample_type = tiff_sample_type(bits, sample_format).ok_or_else(|| {
            CodecError::UnsupportedSampleType {
                path: path.to_path_buf(),
            }
        })?;
        Ok(PlaneInfo {
            shape: (height as usize, width as usize),
            sample_type,
        })
    } else {
        let image = image::open(path).map_err(|source| CodecError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let sample_type = dynamic_image_type(&image).ok_or_else(|| CodecError::NotGrayscale {
            path: path.to_path_buf(),
        })?;
        Ok(PlaneInfo {
            shape: (image.height() as usize, image.width() as usize),
            sample_type,
        })
    }
}

/// Read a single 2D plane. Multi-page TIFF files yield their first page.
pub fn read_plane<T: Voxel>(path: &Path) -> Result<Array2<T>> {
    if is_tiff(path) {
        let mut decoder = open_tiff(path)?;
        return decode_page(&mut decoder, path);
    }

    let image = image::open(path).map_err(|source| CodecError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let found = dynamic_image_type(&image).ok_or_else(|| CodecError::NotGrayscale {
        path: path.to_path_buf(),
    })?;
    T::from_dynamic_image(image).ok_or(CodecError::SampleTypeMismatch {
        path: path.to_path_buf(),
        expected: T::SAMPLE_TYPE,
        found,
    })
}

/// Read every page of a multi-page TIFF, stacking pages along the last axis.
pub fn read_tiff_stack<T: Voxel>(path: &Path) -> Result<Array3<T>> {
    let mut decoder = open_tiff(path)?;
    let first = decode_page::<T>(&mut decoder, path)?;
    let (rows, cols) = first.dim();

    let mut pages = vec![first];
    while decoder.more_images() {
        decoder.next_image().map_err(tiff_error(path))?;
        let page = decode_page::<T>(&mut decoder, path)?;
        if page.dim() != (rows, cols) {
            return Err(CodecError::InconsistentPages {
                path: path.to_path_buf(),
            });
        }
        pages.push(page);
    }

    let mut stack = Array3::<T>::default((rows, cols, pages.len()));
    for (mut plane, page) in stack.axis_iter_mut(Axis(2)).zip(&pages) {
        plane.assign(page);
    }
    Ok(stack)
}

/// Write the planes of `data` (last axis) to `path`, one page per plane.
pub fn write_tiff_pages<'a, T: Voxel>(
    path: &Path,
    planes: impl IntoIterator<Item = ndarray::ArrayView2<'a, T>>,
) -> Result<()> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_error(path))?;

    for plane in planes {
        let (rows, cols) = plane.dim();
        let samples: Vec<T> = plane.iter().copied().collect();
        T::write_tiff_page(&mut encoder, cols as u32, rows as u32, &samples)
            .map_err(tiff_error(path))?;
    }
    Ok(())
}

/// Header-only view of a NIfTI file; the voxels stay on disk until
/// [`VolumeFile::read`] is called.
#[derive(Clone, Debug)]
pub struct VolumeFile {
    pub path: PathBuf,
    pub header: NiftiHeader,
}

impl VolumeFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let object = ReaderStreamedOptions::new()
            .read_file(path)
            .map_err(nifti_error(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            header: object.header().clone(),
        })
    }

    /// Extents of the first three dimensions.
    pub fn dim(&self) -> (usize, usize, usize) {
        let dim = self.header.dim;
        (dim[1] as usize, dim[2] as usize, dim[3].max(1) as usize)
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        header_spacing(&self.header)
    }

    pub fn affine(&self) -> Option<Affine> {
        header_affine(&self.header)
    }

    pub fn sample_type(&self) -> Option<SampleType> {
        match self.header.data_type().ok()? {
            NiftiType::Uint8 => Some(SampleType::U8),
            NiftiType::Uint16 => Some(SampleType::U16),
            NiftiType::Uint32 => Some(SampleType::U32),
            NiftiType::Float32 => Some(SampleType::F32),
            NiftiType::Float64 => Some(SampleType::F64),
            _ => None,
        }
    }

    /// Materialise the voxels, converting them to `T`.
    pub fn read<T: Voxel>(&self) -> Result<Volume<T>> {
        read_nifti(&self.path)
    }
}

fn header_spacing(header: &NiftiHeader) -> (f32, f32, f32) {
    (header.pixdim[1], header.pixdim[2], header.pixdim[3])
}

fn header_affine(header: &NiftiHeader) -> Option<Affine> {
    (header.sform_code > 0).then(|| {
        [
            header.srow_x,
            header.srow_y,
            header.srow_z,
            [0.0, 0.0, 0.0, 1.0],
        ]
    })
}

fn into_volume_array<T>(path: &Path, data: ArrayD<T>) -> Result<Array3<T>> {
    // Some writers store 3D data with a trailing singleton time axis
    let data = if data.ndim() == 4 && data.len_of(Axis(3)) == 1 {
        data.index_axis_move(Axis(3), 0)
    } else {
        data
    };
    let ndim = data.ndim();
    data.into_dimensionality::<Ix3>()
        .map_err(|_| CodecError::NotAVolume {
            path: path.to_path_buf(),
            ndim,
        })
}

pub fn read_nifti<T: Voxel>(path: &Path) -> Result<Volume<T>> {
    let object = ReaderOptions::new()
        .read_file(path)
        .map_err(nifti_error(path))?;
    let header = object.header().clone();
    let data = T::read_nifti(object).map_err(nifti_error(path))?;
    let data = into_volume_array(path, data)?;

    let mut volume = Volume::new(data.as_standard_layout().into_owned())
        .with_spacing(header_spacing(&header));
    volume.affine = header_affine(&header);
    Ok(volume)
}

pub fn write_nifti<T: Voxel>(
    path: &Path,
    data: &Array3<T>,
    spacing: (f32, f32, f32),
    affine: &Affine,
) -> Result<()> {
    let mut header = NiftiHeader::default();
    header.pixdim[1] = spacing.0;
    header.pixdim[2] = spacing.1;
    header.pixdim[3] = spacing.2;
    header.sform_code = 2;
    header.srow_x = affine[0];
    header.srow_y = affine[1];
    header.srow_z = affine[2];

    let options = WriterOptions::new(path).reference_header(&header);
    T::write_nifti(&options, data).map_err(nifti_error(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::tempdir;

    #[test]
    fn tiff_stack_keeps_page_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let data = Array3::from_shape_fn((3, 5, 4), |(i, j, k)| (i + 3 * j + 15 * k) as u16);

        write_tiff_pages(&path, data.axis_iter(Axis(2))).unwrap();
        let reloaded = read_tiff_stack::<u16>(&path).unwrap();
        assert_eq!(reloaded, data);
    }

    #[test]
    fn peek_reports_shape_and_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plane.tif");
        let data = Array3::from_elem((6, 7, 1), 9u8);
        write_tiff_pages(&path, data.axis_iter(Axis(2))).unwrap();

        let info = peek_plane(&path).unwrap();
        assert_eq!(info.shape, (6, 7));
        assert_eq!(info.sample_type, SampleType::U8);
        assert_eq!(info.byte_size(), 42);
    }

    #[test]
    fn peek_reads_wide_sample_types_from_tags() {
        let dir = tempdir().unwrap();
        let float_path = dir.path().join("float.tif");
        let wide_path = dir.path().join("wide.tif");
        write_tiff_pages(&float_path, Array3::from_elem((3, 2, 1), 0.5f32).axis_iter(Axis(2)))
            .unwrap();
        write_tiff_pages(&wide_path, Array3::from_elem((4, 5, 1), 70_000u32).axis_iter(Axis(2)))
            .unwrap();

        let float = peek_plane(&float_path).unwrap();
        assert_eq!(float.shape, (3, 2));
        assert_eq!(float.sample_type, SampleType::F32);
        let wide = peek_plane(&wide_path).unwrap();
        assert_eq!(wide.shape, (4, 5));
        assert_eq!(wide.sample_type, SampleType::U32);
    }

    #[test]
    fn reading_plane_with_wrong_type_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plane.tif");
        let data = Array3::from_elem((2, 2, 1), 9u8);
        write_tiff_pages(&path, data.axis_iter(Axis(2))).unwrap();

        let err = read_plane::<u16>(&path).unwrap_err();
        assert!(matches!(err, CodecError::SampleTypeMismatch { .. }));
    }

    #[test]
    fn nifti_header_is_readable_without_voxels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volume.nii");
        let data = Array3::from_shape_fn((4, 3, 2), |(i, j, k)| (i + j + k) as f32);
        let mut affine = crate::volume::IDENTITY_AFFINE;
        affine[0][3] = 5.0;
        write_nifti(&path, &data, (0.01, 0.02, 0.05), &affine).unwrap();

        let file = VolumeFile::open(&path).unwrap();
        assert_eq!(file.dim(), (4, 3, 2));
        assert_eq!(file.spacing(), (0.01, 0.02, 0.05));
        assert_eq!(file.sample_type(), Some(SampleType::F32));
        assert_eq!(file.affine().unwrap()[0][3], 5.0);

        let volume = file.read::<f32>().unwrap();
        assert_eq!(volume.data, data);
    }
}
