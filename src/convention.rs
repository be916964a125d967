//! RAS ↔ LPS conversion of voxel data and spatial references.
//!
//! Both operations are their own inverse, so the same call converts in
//! either direction.

use ndarray::{Array3, Axis};

use crate::{
    assembler::{VolumeGrid, map_grid},
    error::{Result, StitchError},
    spatial::SpatialReference,
};

/// Flips an array along its first two axes.
pub fn flip_in_plane<T: Clone>(data: &Array3<T>) -> Array3<T> {
    let mut view = data.view();
    view.invert_axis(Axis(0));
    view.invert_axis(Axis(1));
    view.as_standard_layout().into_owned()
}

/// Flips a volume grid along its first two axes, keeping its sample type.
pub fn flip_grid(grid: &VolumeGrid) -> VolumeGrid {
    map_grid!(grid, data => flip_in_plane(data))
}

/// Maps row-major flat indices of a grid of shape `dim` the way
/// [`flip_in_plane`] moves the voxels they address.
///
/// The result is sorted, like indices extracted from a dense mask.
pub fn flip_flat_indices(indices: &[usize], dim: (usize, usize, usize)) -> Result<Vec<usize>> {
    let (d0, d1, d2) = dim;
    let voxel_count = d0 * d1 * d2;
    let plane = d1 * d2;

    let mut flipped = indices
        .iter()
        .map(|&index| {
            if index >= voxel_count {
                return Err(StitchError::IndexOutOfBounds { index, voxel_count });
            }
            let (i, j, k) = (index / plane, (index % plane) / d2, index % d2);
            Ok(((d0 - 1 - i) * d1 + (d1 - 1 - j)) * d2 + k)
        })
        .collect::<Result<Vec<_>>>()?;
    flipped.sort_unstable();
    Ok(flipped)
}

/// Swaps the X and Y axes of a spatial reference wholesale.
pub fn swap_in_plane_axes(reference: &SpatialReference) -> SpatialReference {
    SpatialReference {
        x: reference.y,
        y: reference.x,
        z: reference.z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::FlatIndices;

    #[test]
    fn test_flip_moves_corners() {
        let data = Array3::from_shape_fn((2, 3, 2), |(i, j, k)| (i * 100 + j * 10 + k) as i32);
        let flipped = flip_in_plane(&data);
        assert_eq!(flipped.dim(), (2, 3, 2));
        assert_eq!(flipped[[0, 0, 0]], data[[1, 2, 0]]);
        assert_eq!(flipped[[1, 2, 1]], data[[0, 0, 1]]);
        assert_eq!(flipped[[0, 1, 1]], data[[1, 1, 1]]);
        assert!(flipped.is_standard_layout());
    }

    #[test]
    fn test_flip_is_involutive() {
        let data = Array3::from_shape_fn((3, 4, 5), |(i, j, k)| (i + 2 * j + 7 * k) as f32 * 0.25);
        let grid = VolumeGrid::F32(data.clone());
        assert_eq!(flip_grid(&flip_grid(&grid)), grid);
        assert_eq!(flip_in_plane(&flip_in_plane(&data)), data);
    }

    #[test]
    fn test_flat_indices_follow_voxels() {
        let dim = (3, 4, 2);
        let mut mask = Array3::<u8>::zeros(dim);
        for index in [[0, 0, 0], [2, 1, 1], [1, 3, 0], [0, 2, 1]] {
            mask[index] = 1;
        }
        let indices = FlatIndices::from_mask(mask.view()).indices;
        let expected = FlatIndices::from_mask(flip_in_plane(&mask).view()).indices;

        let flipped = flip_flat_indices(&indices, dim).unwrap();
        assert_eq!(flipped, expected);
        assert_eq!(flip_flat_indices(&flipped, dim).unwrap(), indices);
    }

    #[test]
    fn test_flat_index_out_of_range() {
        assert!(matches!(
            flip_flat_indices(&[3, 24], (2, 3, 4)),
            Err(StitchError::IndexOutOfBounds { index: 24, voxel_count: 24 })
        ));
    }

    #[test]
    fn test_swap_is_involutive() {
        let reference = SpatialReference::new([0.5, 0.8, 2.0], [1.0, -4.0, 9.0], [4, 6, 3]).unwrap();
        let swapped = swap_in_plane_axes(&reference);
        assert_eq!(swapped.x, reference.y);
        assert_eq!(swapped.y, reference.x);
        assert_eq!(swapped.z, reference.z);
        assert_eq!(swap_in_plane_axes(&swapped), reference);

        for axis in swapped.axes() {
            let extent = axis.image_extent() / axis.size as f64;
            assert!((extent - axis.pixel_extent).abs() < 1e-12);
        }
    }
}
