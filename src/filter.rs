//! Filtering applied to the sample before registration so the registration
//! does not overfit fine details: a despeckle by grayscale opening followed by
//! a pseudo flat-field correction, then a renormalisation to 16 bits.

use ndarray::{Array, Array1, Array2, Array3, ArrayView2, ArrayViewMut1, Axis, Dimension};
use tracing::{debug, info};

use crate::voxel::Voxel;

/// Radius of the disk used for the despeckle opening
pub const DESPECKLE_RADIUS: usize = 2;

/// Sigma of the Gaussian used as the flat-field estimate
pub const FLATFIELD_SIGMA: f64 = 5.0;

/// Gaussian kernels are cut at this many sigmas
const TRUNCATE: f64 = 4.0;

/// Filter every plane (last axis) of `volume` in index order and renormalise
/// the whole volume to the full `u16` range.
pub fn filter_for_registration<T: Voxel>(volume: &Array3<T>) -> Array3<u16> {
    let mut working = volume.mapv(T::as_f64);
    let n_planes = working.len_of(Axis(2));
    info!(planes = n_planes, "Filtering for registration");

    for index in 0..n_planes {
        let mut plane = working.index_axis_mut(Axis(2), index);
        let filtered = filter_plane_for_registration(plane.view());
        plane.assign(&filtered);
        debug!(plane = index, "Filtered plane");
    }

    scale_to_16_bits(&mut working);
    working.mapv(u16::from_f64)
}

/// Despeckle then pseudo flat-field a single plane.
pub fn filter_plane_for_registration(plane: ArrayView2<f64>) -> Array2<f64> {
    let despeckled = despeckle_by_opening(plane, DESPECKLE_RADIUS);
    pseudo_flatfield(despeckled.view(), FLATFIELD_SIGMA)
}

/// Divide the plane by a heavily blurred copy of itself.
///
/// The `+ 1` in the denominator avoids dividing by zero and damps the
/// correction in very dark regions.
pub fn pseudo_flatfield(plane: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    let blurred = gaussian_filter(plane, sigma);
    &plane / &(blurred + 1.0)
}

/// Rescale in place so the maximum becomes `2^16 - 1`.
///
/// An all-zero image is left untouched instead of dividing by zero.
pub fn scale_to_16_bits<D: Dimension>(image: &mut Array<f64, D>) {
    let max = image.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if max == 0.0 || !max.is_finite() {
        return;
    }
    let factor = f64::from(u16::MAX);
    image.mapv_inplace(|v| v / max * factor);
}

/// Grayscale opening (erosion then dilation) with a disk of `radius`.
/// Footprint elements falling outside the plane are ignored.
pub fn despeckle_by_opening(plane: ArrayView2<f64>, radius: usize) -> Array2<f64> {
    let footprint = disk(radius);
    let eroded = apply_footprint(plane, &footprint, f64::min, f64::INFINITY);
    apply_footprint(eroded.view(), &footprint, f64::max, f64::NEG_INFINITY)
}

/// Offsets `(dy, dx)` of a disk with `dy^2 + dx^2 <= radius^2`.
fn disk(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    (-r..=r)
        .flat_map(|dy| (-r..=r).map(move |dx| (dy, dx)))
        .filter(|(dy, dx)| dy * dy + dx * dx <= r * r)
        .collect()
}

fn apply_footprint(
    plane: ArrayView2<f64>,
    footprint: &[(isize, isize)],
    reduce: fn(f64, f64) -> f64,
    identity: f64,
) -> Array2<f64> {
    let (rows, cols) = plane.dim();
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        footprint
            .iter()
            .filter_map(|&(dy, dx)| {
                let y = row.checked_add_signed(dy).filter(|&y| y < rows)?;
                let x = col.checked_add_signed(dx).filter(|&x| x < cols)?;
                Some(plane[[y, x]])
            })
            .fold(identity, reduce)
    })
}

/// Normalised 1D Gaussian kernel truncated at `TRUNCATE` sigmas.
fn gaussian_kernel(sigma: f64) -> Array1<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let kernel = Array1::from_iter(
        (-radius..=radius).map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp()),
    );
    let total = kernel.sum();
    kernel / total
}

/// Index into `len` samples with half-sample symmetric reflection,
/// `... c b a | a b c ... | z y x ...`.
#[inline]
fn reflect(index: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = index.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn convolve_line(mut line: ArrayViewMut1<f64>, kernel: &Array1<f64>) {
    let len = line.len();
    let radius = (kernel.len() / 2) as isize;
    let source = line.to_owned();
    for (i, out) in line.iter_mut().enumerate() {
        *out = kernel
            .iter()
            .enumerate()
            .map(|(k, weight)| weight * source[reflect(i as isize + k as isize - radius, len)])
            .sum();
    }
}

/// Separable Gaussian blur with reflected borders.
pub fn gaussian_filter(plane: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    let mut blurred = plane.to_owned();
    if sigma <= 0.0 {
        return blurred;
    }
    let kernel = gaussian_kernel(sigma);
    for axis in [Axis(0), Axis(1)] {
        for line in blurred.lanes_mut(axis) {
            convolve_line(line, &kernel);
        }
    }
    blurred
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn normalise_to_16_bits() {
        let mut a = array![0.0, 2.0, 4.0, 240.0];
        scale_to_16_bits(&mut a);
        assert_eq!(a.fold(f64::MIN, |m, &v| m.max(v)), 65535.0);
        assert_eq!(a.fold(f64::MAX, |m, &v| m.min(v)), 0.0);
        assert_eq!(a.len(), 4);
        assert!((a[1] - 546.13).abs() < 546.13 * 0.1);
    }

    #[test]
    fn all_zero_volume_stays_zero() {
        let volume = Array3::<u16>::zeros((8, 8, 3));
        let filtered = filter_for_registration(&volume);
        assert!(filtered.iter().all(|&v| v == 0));
    }

    #[test]
    fn disk_of_radius_two_has_thirteen_elements() {
        assert_eq!(disk(2).len(), 13);
        assert_eq!(disk(0), vec![(0, 0)]);
    }

    #[test]
    fn opening_removes_isolated_speckles() {
        let mut plane = Array2::<f64>::from_elem((9, 9), 10.0);
        plane[[4, 4]] = 500.0;
        let opened = despeckle_by_opening(plane.view(), 2);
        assert!(opened.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn opening_keeps_large_structures() {
        let mut plane = Array2::<f64>::zeros((15, 15));
        for y in 3..12 {
            for x in 3..12 {
                plane[[y, x]] = 100.0;
            }
        }
        let opened = despeckle_by_opening(plane.view(), 2);
        assert_eq!(opened[[7, 7]], 100.0);
        assert_eq!(opened[[0, 0]], 0.0);
    }

    #[test]
    fn gaussian_preserves_constant_planes() {
        let plane = Array2::<f64>::from_elem((6, 30), 3.0);
        let blurred = gaussian_filter(plane.view(), 5.0);
        assert!(blurred.iter().all(|&v| (v - 3.0).abs() < 1e-9));
    }

    #[test]
    fn flatfield_of_constant_plane() {
        let plane = Array2::<f64>::from_elem((10, 10), 4.0);
        let corrected = pseudo_flatfield(plane.view(), 5.0);
        assert!(corrected.iter().all(|&v| (v - 0.8).abs() < 1e-9));
    }

    #[test]
    fn reflect_mirrors_both_borders() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(9, 2), 1);
    }

    #[test]
    fn filtered_volume_spans_full_range() {
        let volume = Array3::from_shape_fn((12, 12, 2), |(i, j, k)| ((i * j + k) % 7 * 40) as u16);
        let filtered = filter_for_registration(&volume);
        assert_eq!(filtered.dim(), (12, 12, 2));
        assert_eq!(filtered.iter().copied().max(), Some(u16::MAX));
    }
}
