//! Sample types a [`Volume`](crate::volume::Volume) can hold.
//!
//! Each codec bounds its element type differently (`tiff` per colour type,
//! `nifti` per primitive conversion), so the glue lives here once per concrete
//! type instead of leaking those bounds into every generic function.

use std::fmt::Debug;
use std::io::{Seek, Write};

use image::DynamicImage;
use ndarray::{Array2, Array3, ArrayD};
use nifti::writer::WriterOptions;
use nifti::{InMemNiftiObject, IntoNdArray, NiftiError, NiftiObject};
use tiff::TiffResult;
use tiff::decoder::DecodingResult;
use tiff::encoder::{TiffEncoder, colortype};

use crate::enums::SampleType;

pub trait Voxel: Copy + Default + PartialOrd + Debug + Send + Sync + 'static {
    const SAMPLE_TYPE: SampleType;

    /// Largest representable value, used by masks and normalisation.
    const MAX: Self;

    fn as_f64(self) -> f64;

    /// Saturating conversion from a working `f64` value.
    fn from_f64(value: f64) -> Self;

    fn from_decoding_result(result: DecodingResult) -> Option<Vec<Self>>;

    fn write_tiff_page<W: Write + Seek>(
        encoder: &mut TiffEncoder<W>,
        width: u32,
        height: u32,
        data: &[Self],
    ) -> TiffResult<()>;

    /// Grayscale planes decoded by the `image` crate, `None` for other layouts.
    fn from_dynamic_image(_image: DynamicImage) -> Option<Array2<Self>> {
        None
    }

    fn read_nifti(object: InMemNiftiObject) -> Result<ArrayD<Self>, NiftiError>;

    fn write_nifti(options: &WriterOptions<'_>, data: &Array3<Self>) -> Result<(), NiftiError>;
}

macro_rules! impl_voxel {
    ($t:ty, $sample:ident, $variant:ident, $color:ty) => {
        impl_voxel!($t, $sample, $variant, $color, {});
    };
    ($t:ty, $sample:ident, $variant:ident, $color:ty, $luma:ident) => {
        impl_voxel!($t, $sample, $variant, $color, {
            fn from_dynamic_image(image: DynamicImage) -> Option<Array2<Self>> {
                match image {
                    DynamicImage::$luma(buf) => {
                        let (width, height) = buf.dimensions();
                        Array2::from_shape_vec((height as usize, width as usize), buf.into_raw())
                            .ok()
                    }
                    _ => None,
                }
            }
        });
    };
    ($t:ty, $sample:ident, $variant:ident, $color:ty, { $($extra:item)* }) => {
        impl Voxel for $t {
            const SAMPLE_TYPE: SampleType = SampleType::$sample;
            const MAX: Self = <$t>::MAX;

            #[inline]
            fn as_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn from_decoding_result(result: DecodingResult) -> Option<Vec<Self>> {
                match result {
                    DecodingResult::$variant(buf) => Some(buf),
                    _ => None,
                }
            }

            fn write_tiff_page<W: Write + Seek>(
                encoder: &mut TiffEncoder<W>,
                width: u32,
                height: u32,
                data: &[Self],
            ) -> TiffResult<()> {
                encoder.write_image::<$color>(width, height, data)
            }

            fn read_nifti(object: InMemNiftiObject) -> Result<ArrayD<Self>, NiftiError> {
                object.into_volume().into_ndarray::<$t>()
            }

            fn write_nifti(
                options: &WriterOptions<'_>,
                data: &Array3<Self>,
            ) -> Result<(), NiftiError> {
                options.write_nifti(data)
            }

            $($extra)*
        }
    };
}

// `image` only decodes 8 and 16 bit grayscale planes.
impl_voxel!(u8, U8, U8, colortype::Gray8, ImageLuma8);
impl_voxel!(u16, U16, U16, colortype::Gray16, ImageLuma16);
impl_voxel!(u32, U32, U32, colortype::Gray32);
impl_voxel!(f32, F32, F32, colortype::Gray32Float);
impl_voxel!(f64, F64, F64, colortype::Gray64Float);

/// Sample type of a decoded TIFF page, `None` for signed integer layouts.
pub(crate) fn decoding_result_type(result: &DecodingResult) -> Option<SampleType> {
    match result {
        DecodingResult::U8(_) => Some(SampleType::U8),
        DecodingResult::U16(_) => Some(SampleType::U16),
        DecodingResult::U32(_) => Some(SampleType::U32),
        DecodingResult::F32(_) => Some(SampleType::F32),
        DecodingResult::F64(_) => Some(SampleType::F64),
        _ => None,
    }
}

/// Sample type described by a grayscale TIFF's bit depth and its
/// SampleFormat tag (1 unsigned integer, 3 IEEE float).
pub(crate) fn tiff_sample_type(bits: u8, sample_format: u16) -> Option<SampleType> {
    match (bits, sample_format) {
        (8, 1) => Some(SampleType::U8),
        (16, 1) => Some(SampleType::U16),
        (32, 1) => Some(SampleType::U32),
        (32, 3) => Some(SampleType::F32),
        (64, 3) => Some(SampleType::F64),
        _ => None,
    }
}

/// Sample type of an image decoded by the `image` crate, grayscale only.
pub(crate) fn dynamic_image_type(image: &DynamicImage) -> Option<SampleType> {
    match image {
        DynamicImage::ImageLuma8(_) => Some(SampleType::U8),
        DynamicImage::ImageLuma16(_) => Some(SampleType::U16),
        _ => None,
    }
}
