use ndarray::{Array3, ArrayView2, Axis, s};

use crate::voxel::Voxel;

/// Row-major 4x4 affine transform, as stored in the NIfTI sform.
pub type Affine = [[f32; 4]; 4];

pub const IDENTITY_AFFINE: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

pub const UNIT_SPACING: (f32, f32, f32) = (1.0, 1.0, 1.0);

/// A dense 3D image with optional physical metadata.
///
/// Planes are stacked along the last axis: `data[[i, j, k]]` is sample
/// `(i, j)` of plane `k`.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    pub data: Array3<T>,
    /// Voxel size in mm along each axis
    pub spacing: Option<(f32, f32, f32)>,
    pub affine: Option<Affine>,
}

impl<T: Voxel> Volume<T> {
    pub fn new(data: Array3<T>) -> Self {
        Self {
            data,
            spacing: None,
            affine: None,
        }
    }

    pub fn with_spacing(mut self, spacing: (f32, f32, f32)) -> Self {
        self.spacing = Some(spacing);
        self
    }

    /// Get the dimensions of the volume
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    pub fn n_planes(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn plane(&self, index: usize) -> Option<ArrayView2<'_, T>> {
        (index < self.n_planes()).then(|| self.data.slice(s![.., .., index]))
    }

    /// Reorder the axes, the metadata is carried over untouched.
    pub fn permuted(self, axes: [usize; 3]) -> Self {
        let data = self.data.permuted_axes(axes).as_standard_layout().into_owned();
        Self { data, ..self }
    }

    /// Flip the volume along every axis whose flag is set.
    pub fn flip(&mut self, axes: (bool, bool, bool)) {
        for (index, flip) in [axes.0, axes.1, axes.2].into_iter().enumerate() {
            if flip {
                self.data.invert_axis(Axis(index));
            }
        }
        self.data = self.data.as_standard_layout().into_owned();
    }

    /// Convert every sample, saturating where the target type is narrower.
    pub fn cast<U: Voxel>(&self) -> Volume<U> {
        Volume {
            data: self.data.mapv(|v| U::from_f64(v.as_f64())),
            spacing: self.spacing,
            affine: self.affine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Volume<u16> {
        Volume::new(Array3::from_shape_fn((2, 3, 4), |(i, j, k)| {
            (i * 100 + j * 10 + k) as u16
        }))
    }

    #[test]
    fn plane_indexes_last_axis() {
        let volume = ramp();
        assert_eq!(volume.n_planes(), 4);
        let plane = volume.plane(3).unwrap();
        assert_eq!(plane.dim(), (2, 3));
        assert_eq!(plane[[1, 2]], 123);
        assert!(volume.plane(4).is_none());
    }

    #[test]
    fn permuted_keeps_values_and_metadata() {
        let volume = ramp().with_spacing((0.01, 0.02, 0.03));
        let permuted = volume.clone().permuted([2, 0, 1]);
        assert_eq!(permuted.dim(), (4, 2, 3));
        assert_eq!(permuted.data[[3, 1, 2]], volume.data[[1, 2, 3]]);
        assert_eq!(permuted.spacing, Some((0.01, 0.02, 0.03)));
    }

    #[test]
    fn flip_reverses_selected_axes() {
        let mut volume = ramp();
        volume.flip((false, false, true));
        assert_eq!(volume.data[[0, 0, 0]], 3);
        assert_eq!(volume.data[[1, 2, 3]], 120);
    }

    #[test]
    fn cast_saturates() {
        let volume = Volume::new(Array3::from_elem((1, 1, 2), 300.0f32));
        let cast: Volume<u8> = volume.cast();
        assert!(cast.data.iter().all(|&v| v == 255));
    }
}
