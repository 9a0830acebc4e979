use ndarray::{Array3, Zip};

use crate::voxel::Voxel;

const FACE_NEIGHBOURS: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Mask of the inner boundaries of every labelled region: a labelled voxel
/// is on a boundary when one of its face neighbours inside the volume holds a
/// different label.
pub fn find_inner_boundaries<T: Voxel>(labels: &Array3<T>) -> Array3<bool> {
    let (d0, d1, d2) = labels.dim();
    let background = T::default();

    Array3::from_shape_fn((d0, d1, d2), |(i, j, k)| {
        let label = labels[[i, j, k]];
        if label == background {
            return false;
        }
        FACE_NEIGHBOURS.iter().any(|&(di, dj, dk)| {
            let neighbour = i
                .checked_add_signed(di)
                .filter(|&i| i < d0)
                .zip(j.checked_add_signed(dj).filter(|&j| j < d1))
                .zip(k.checked_add_signed(dk).filter(|&k| k < d2));
            match neighbour {
                Some(((i, j), k)) => labels[[i, j, k]] != label,
                None => false,
            }
        })
    })
}

/// Keep the labels on region boundaries and zero everything else.
pub fn outline_labels<T: Voxel>(labels: &Array3<T>) -> Array3<T> {
    let boundaries = find_inner_boundaries(labels);
    let mut outlines = labels.clone();
    Zip::from(&mut outlines)
        .and(&boundaries)
        .for_each(|value, &is_boundary| {
            if !is_boundary {
                *value = T::default();
            }
        });
    outlines
}
