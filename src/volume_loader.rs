use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis, s};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::codecs::{self, CodecError, VolumeFile};
use crate::enums::{SampleType, SortBy};
use crate::interpolator::Interpolator;
use crate::volume::Volume;
use crate::voxel::Voxel;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("Could not guess loading method for path {}", .0.display())]
    UnrecognizedSource(PathBuf),

    #[error("No planes found in {}", .0.display())]
    NoPlanes(PathBuf),

    #[error("Not enough memory on the system to complete loading operation. Needed {needed}, only {available} available")]
    OutOfMemory { needed: u64, available: u64 },

    #[error("Scaling factors must be finite and positive, got x={x} y={y} z={z}")]
    InvalidScaling { x: f64, y: f64, z: f64 },

    #[error("In-plane rescaling needs both x and y factors to differ from 1, got x={x} y={y}")]
    UnsupportedScaling { x: f64, y: f64 },

    #[error("Plane {} has shape {found:?}, expected {expected:?}", .path.display())]
    InconsistentDimensions {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Planes hold {found:?} samples but {expected:?} was requested")]
    SampleTypeMismatch {
        expected: SampleType,
        found: SampleType,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Could not start loader threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Could not assemble partial volumes: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, VolumeLoaderError>;

/// Multipliers taking the sample voxel grid onto the atlas voxel grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalingFactors {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for ScalingFactors {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ScalingFactors {
    pub const IDENTITY: Self = Self {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Ratio of the sample voxel size to the atlas voxel size on each axis.
    pub fn from_spacing(sample: (f64, f64, f64), atlas: (f64, f64, f64)) -> Self {
        Self {
            x: sample.0 / atlas.0,
            y: sample.1 / atlas.1,
            z: sample.2 / atlas.2,
        }
    }

    fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|factor| factor.is_finite() && *factor > 0.0)
    }

    fn rescales_planes(&self) -> bool {
        self.x != 1.0 && self.y != 1.0
    }
}

#[derive(Clone, Debug)]
pub struct LoaderOptions {
    /// Substring a file name must contain to be part of a directory source
    pub name_filter: String,
    pub sort_by: SortBy,
    /// Load planes on a pool of `cores - 1` threads
    pub parallel: bool,
    /// Overrides the detected worker count of parallel loads
    pub workers: Option<usize>,
    /// Overrides the memory reported by the system
    pub available_memory: Option<u64>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            name_filter: ".tif".to_string(),
            sort_by: SortBy::None,
            parallel: false,
            workers: None,
            available_memory: None,
        }
    }
}

impl LoaderOptions {
    /// Get available memory - uses override if set, otherwise queries system.
    pub fn available_memory(&self) -> u64 {
        self.available_memory.unwrap_or_else(system_available_memory)
    }

    fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .saturating_sub(1)
        })
        .max(1)
    }
}

fn system_available_memory() -> u64 {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// The shapes a sample can be stored in on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeSource {
    /// Folder of 2D planes, one file per plane
    Directory(PathBuf),
    /// Text file listing one plane path per line
    Manifest(PathBuf),
    /// Single multi-page TIFF
    StackFile(PathBuf),
    /// NIfTI container
    VolumetricFile(PathBuf),
}

impl VolumeSource {
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(Self::Directory(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if name.ends_with(".txt") {
            Ok(Self::Manifest(path.to_path_buf()))
        } else if name.ends_with(".tif") || name.ends_with(".tiff") {
            Ok(Self::StackFile(path.to_path_buf()))
        } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Ok(Self::VolumetricFile(path.to_path_buf()))
        } else {
            Err(VolumeLoaderError::UnrecognizedSource(path.to_path_buf()))
        }
    }

    /// Ordered plane paths for the plane based sources, `None` for sources
    /// that already hold a whole volume.
    pub fn plane_paths(&self, options: &LoaderOptions) -> Result<Option<Vec<PathBuf>>> {
        match self {
            Self::Directory(dir) => {
                VolumeLoader::list_directory(dir, &options.name_filter).map(Some)
            }
            Self::Manifest(manifest) => {
                VolumeLoader::read_manifest(manifest, options.sort_by).map(Some)
            }
            Self::StackFile(_) | Self::VolumetricFile(_) => Ok(None),
        }
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load the volume at `path`, guessing the source kind from the path.
    ///
    /// x and y scaling only apply to plane based sources; z scaling applies to
    /// every source once the volume is assembled.
    ///
    /// # Errors
    ///
    /// Returns an error if a scaling factor is not a positive finite number,
    /// if the source kind is unknown, if the planes would not fit in memory,
    /// or if a plane cannot be decoded as `T`
    pub fn load<T: Voxel>(
        path: impl AsRef<Path>,
        scaling: ScalingFactors,
        options: &LoaderOptions,
    ) -> Result<Volume<T>> {
        if !scaling.is_valid() {
            return Err(VolumeLoaderError::InvalidScaling {
                x: scaling.x,
                y: scaling.y,
                z: scaling.z,
            });
        }
        let source = VolumeSource::resolve(path)?;
        debug!(?source, "Resolved volume source");

        let mut volume = match &source {
            VolumeSource::Directory(_) | VolumeSource::Manifest(_) => {
                let paths = source.plane_paths(options)?.unwrap_or_default();
                Self::load_from_file_paths(&paths, scaling.x, scaling.y, options)?
            }
            VolumeSource::StackFile(path) => {
                Volume::new(codecs::read_tiff_stack(path)?)
            }
            VolumeSource::VolumetricFile(path) => codecs::read_nifti(path)?,
        };

        if scaling.z != 1.0 {
            volume.data = Self::scale_z(volume.data, scaling.z);
        }
        Ok(volume)
    }

    /// Sample type stored by the source at `path`, read from the first plane
    /// or from the NIfTI header, so callers can pick `T` before loading.
    pub fn sample_type(path: impl AsRef<Path>, options: &LoaderOptions) -> Result<SampleType> {
        let source = VolumeSource::resolve(path)?;
        match &source {
            VolumeSource::Directory(_) | VolumeSource::Manifest(_) => {
                let paths = source.plane_paths(options)?.unwrap_or_default();
                let first = paths.first().ok_or(VolumeLoaderError::NoPlanes(PathBuf::new()))?;
                Ok(codecs::peek_plane(first)?.sample_type)
            }
            VolumeSource::StackFile(path) => Ok(codecs::peek_plane(path)?.sample_type),
            VolumeSource::VolumetricFile(path) => {
                let file = VolumeFile::open(path)?;
                file.sample_type().ok_or_else(|| {
                    CodecError::UnsupportedSampleType { path: path.clone() }.into()
                })
            }
        }
    }

    /// Read only the header of a NIfTI file.
    pub fn open_volumetric(path: impl AsRef<Path>) -> Result<VolumeFile> {
        Ok(VolumeFile::open(path)?)
    }

    /// Load a volume from an ordered list of plane paths
    pub fn load_from_file_paths<T: Voxel>(
        paths: &[impl AsRef<Path>],
        x_scaling: f64,
        y_scaling: f64,
        options: &LoaderOptions,
    ) -> Result<Volume<T>> {
        let paths: Vec<&Path> = paths.iter().map(AsRef::as_ref).collect();
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoPlanes(PathBuf::new()));
        }

        let available = options.available_memory();
        let data = if options.parallel {
            Self::load_parallel(&paths, x_scaling, y_scaling, available, options.worker_count())?
        } else {
            Self::load_sequence(&paths, x_scaling, y_scaling, available)?
        };
        Ok(Volume::new(data))
    }

    /// Single threaded loading of an ordered sequence of planes.
    pub fn load_sequence<T: Voxel>(
        paths: &[&Path],
        x_scaling: f64,
        y_scaling: f64,
        available_memory: u64,
    ) -> Result<Array3<T>> {
        let first = *paths.first().ok_or(VolumeLoaderError::NoPlanes(PathBuf::new()))?;
        let scaling = ScalingFactors::new(x_scaling, y_scaling, 1.0);
        if (x_scaling != 1.0) != (y_scaling != 1.0) {
            return Err(VolumeLoaderError::UnsupportedScaling {
                x: x_scaling,
                y: y_scaling,
            });
        }

        let info = codecs::peek_plane(first)?;
        if info.sample_type != T::SAMPLE_TYPE {
            return Err(VolumeLoaderError::SampleTypeMismatch {
                expected: T::SAMPLE_TYPE,
                found: info.sample_type,
            });
        }

        Self::check_memory(
            info.byte_size() as f64 * x_scaling * y_scaling,
            paths.len(),
            available_memory,
        )?;

        let shape = (
            Interpolator::scaled_len(info.shape.0, x_scaling),
            Interpolator::scaled_len(info.shape.1, y_scaling),
        );
        let mut volume = Array3::<T>::default((shape.0, shape.1, paths.len()));

        for (index, path) in paths.iter().enumerate() {
            let mut plane = codecs::read_plane::<T>(path)?;
            if plane.dim() != info.shape {
                return Err(VolumeLoaderError::InconsistentDimensions {
                    path: path.to_path_buf(),
                    expected: info.shape,
                    found: plane.dim(),
                });
            }
            if scaling.rescales_planes() {
                plane = Interpolator::resize_plane(&plane.view(), shape);
            }
            volume.slice_mut(s![.., .., index]).assign(&plane);
        }

        debug!(planes = paths.len(), ?shape, "Loaded plane sequence");
        Ok(volume)
    }

    /// Split `paths` into contiguous runs, load each on its own worker and
    /// stack the results back in order.
    pub fn load_parallel<T: Voxel>(
        paths: &[&Path],
        x_scaling: f64,
        y_scaling: f64,
        available_memory: u64,
        workers: usize,
    ) -> Result<Array3<T>> {
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoPlanes(PathBuf::new()));
        }
        let workers = workers.max(1);
        let chunk_len = paths.len().div_ceil(workers);
        info!(workers, planes = paths.len(), "Loading planes in parallel");

        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        let parts = pool.install(|| {
            paths
                .par_chunks(chunk_len)
                .map(|chunk| Self::load_sequence::<T>(chunk, x_scaling, y_scaling, available_memory))
                .collect::<Result<Vec<_>>>()
        })?;

        let views: Vec<_> = parts.iter().map(|part| part.view()).collect();
        Ok(ndarray::concatenate(Axis(2), &views)?)
    }

    /// Fail before allocating if `n_planes` planes of `plane_bytes` bytes
    /// would not fit in `available_memory`.
    pub fn check_memory(plane_bytes: f64, n_planes: usize, available_memory: u64) -> Result<()> {
        let needed = plane_bytes * n_planes as f64;
        if needed >= available_memory as f64 {
            return Err(VolumeLoaderError::OutOfMemory {
                needed: needed as u64,
                available: available_memory,
            });
        }
        Ok(())
    }

    /// Rescale a volume along its last axis only.
    ///
    /// The second and third axes are swapped so the z axis is resampled as the
    /// middle axis, then swapped back.
    pub fn scale_z<T: Voxel>(volume: Array3<T>, factor: f64) -> Array3<T> {
        debug!(factor, "Scaling z dimension");
        let mut swapped = volume;
        swapped.swap_axes(1, 2);
        let len = Interpolator::scaled_len(swapped.len_of(Axis(1)), factor);
        let mut scaled = Interpolator::resize_axis(&swapped.view(), Axis(1), len);
        scaled.swap_axes(1, 2);
        scaled.as_standard_layout().into_owned()
    }

    fn list_directory(dir: &Path, name_filter: &str) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<(String, PathBuf)> = fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                name.contains(name_filter).then(|| (name, entry.path()))
            })
            .collect();

        if entries.is_empty() {
            return Err(VolumeLoaderError::NoPlanes(dir.to_path_buf()));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }

    fn read_manifest(manifest: &Path, sort_by: SortBy) -> Result<Vec<PathBuf>> {
        let contents = fs::read_to_string(manifest)?;
        let mut paths: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoPlanes(manifest.to_path_buf()));
        }

        match sort_by {
            SortBy::None => {}
            SortBy::Lexicographic => paths.sort(),
            SortBy::Natural => paths.sort_by(|a, b| natural_cmp(a, b)),
        }
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }
}

/// Compare strings with runs of ASCII digits ordered by their numeric value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                let left_trimmed = left.trim_start_matches('0');
                let right_trimmed = right.trim_start_matches('0');
                let ordering = left_trimmed
                    .len()
                    .cmp(&right_trimmed.len())
                    .then_with(|| left_trimmed.cmp(right_trimmed))
                    .then_with(|| left.len().cmp(&right.len()));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}
