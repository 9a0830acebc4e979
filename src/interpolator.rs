use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};

use crate::voxel::Voxel;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Target extent of an axis scaled by `factor`, rounding half to even.
    pub(crate) fn scaled_len(len: usize, factor: f64) -> usize {
        ((len as f64) * factor).round_ties_even().max(1.0) as usize
    }

    /// Source coordinate of output sample `index` when resampling `src_len`
    /// samples onto `dst_len`, pixel centres aligned and clamped to the input.
    #[inline]
    fn source_coordinate(index: usize, src_len: usize, dst_len: usize) -> f64 {
        let src = (index as f64 + 0.5) * (src_len as f64 / dst_len as f64) - 0.5;
        src.max(0.0).min((src_len - 1) as f64)
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f64>, y: f64, x: f64) -> f64 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f64;
        let dx = x - x0 as f64;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }

    /// Bilinear resize of a plane to `shape`, values keep their original range.
    pub(crate) fn resize_plane<T: Voxel>(plane: &ArrayView2<T>, shape: (usize, usize)) -> Array2<T> {
        let (src_rows, src_cols) = plane.dim();
        let working = plane.mapv(T::as_f64);
        let working = working.view();

        Array2::from_shape_fn(shape, |(row, col)| {
            let y = Self::source_coordinate(row, src_rows, shape.0);
            let x = Self::source_coordinate(col, src_cols, shape.1);
            T::from_f64(Self::bilinear_interpolate(&working, y, x))
        })
    }

    /// Linear resampling along `axis` only, the other two axes are untouched.
    pub(crate) fn resize_axis<T: Voxel>(volume: &ArrayView3<T>, axis: Axis, len: usize) -> Array3<T> {
        let src_len = volume.len_of(axis);
        let mut shape = [volume.dim().0, volume.dim().1, volume.dim().2];
        shape[axis.index()] = len;
        let mut resized = Array3::<T>::default(shape);

        for index in 0..len {
            let position = Self::source_coordinate(index, src_len, len);
            let lower = position.floor() as usize;
            let upper = (lower + 1).min(src_len - 1);
            let weight = position - lower as f64;

            Zip::from(resized.index_axis_mut(axis, index))
                .and(volume.index_axis(axis, lower))
                .and(volume.index_axis(axis, upper))
                .for_each(|out, &a, &b| {
                    *out = T::from_f64(a.as_f64().mul_add(1.0 - weight, b.as_f64() * weight));
                });
        }

        resized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scaled_len_rounds_half_to_even() {
        assert_eq!(Interpolator::scaled_len(5, 0.5), 2);
        assert_eq!(Interpolator::scaled_len(7, 0.5), 4);
        assert_eq!(Interpolator::scaled_len(4, 2.0), 8);
        assert_eq!(Interpolator::scaled_len(3, 0.1), 1);
    }

    #[test]
    fn resize_plane_identity_shape_is_lossless() {
        let plane = array![[1u16, 2, 3], [4, 5, 6]];
        let resized = Interpolator::resize_plane(&plane.view(), (2, 3));
        assert_eq!(resized, plane);
    }

    #[test]
    fn resize_plane_preserves_range() {
        let plane = array![[0.0f32, 1000.0], [1000.0, 0.0]];
        let resized = Interpolator::resize_plane(&plane.view(), (4, 4));
        assert_eq!(resized.dim(), (4, 4));
        assert!(resized.iter().all(|&v| (0.0..=1000.0).contains(&v)));
        assert_eq!(resized[[0, 0]], 0.0);
        assert_eq!(resized[[0, 3]], 1000.0);
    }

    #[test]
    fn resize_axis_only_touches_one_axis() {
        let volume = Array3::from_shape_fn((2, 4, 3), |(i, j, _)| (i * 10 + j) as f32);
        let resized = Interpolator::resize_axis(&volume.view(), Axis(1), 2);
        assert_eq!(resized.dim(), (2, 2, 3));
        // Halving averages neighbouring pairs
        assert_eq!(resized[[0, 0, 0]], 0.5);
        assert_eq!(resized[[1, 1, 2]], 12.5);
    }
}
