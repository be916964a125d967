//! Voxel to world mappings: the affine transform and the spatial reference.

use ndarray::Array2;

use crate::{
    error::{Result, StitchError},
    ordering::SliceOrder,
    slice::SliceDescriptor,
};

/// 4×4 homogeneous matrix mapping (i, j, k, 1) voxel indices to world
/// coordinates in the convention of the source it was built from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    matrix: [[f64; 4]; 4],
}

impl Default for AffineTransform {
    fn default() -> Self {
        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { matrix }
    }
}

impl AffineTransform {
    pub fn from_matrix(matrix: [[f64; 4]; 4]) -> Self {
        Self { matrix }
    }

    /// Builds the transform of a DICOM series.
    ///
    /// Columns are the row cosine scaled by the column spacing, the column
    /// cosine scaled by the row spacing, and the slice normal scaled by the
    /// derived slice spacing. The translation is the position of the first
    /// slice in resolved order.
    pub fn from_slices(slices: &[SliceDescriptor], order: &SliceOrder) -> Result<Self> {
        let first = &order
            .first()
            .and_then(|index| slices.get(index))
            .ok_or(StitchError::NoSlices)?
            .header;
        let [row_spacing, column_spacing] = first.pixel_spacing;
        let axes = [
            (first.row_cosine, column_spacing),
            (first.column_cosine, row_spacing),
            (order.normal, order.spacing),
        ];

        let mut transform = Self::default();
        for (column, (cosine, spacing)) in axes.iter().enumerate() {
            for (row, c) in cosine.iter().enumerate() {
                transform.matrix[row][column] = c * spacing;
            }
        }
        for (row, p) in first.position.iter().enumerate() {
            transform.matrix[row][3] = *p;
        }
        Ok(transform)
    }

    pub fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.matrix
    }

    pub fn to_ndarray(&self) -> Array2<f64> {
        Array2::from_shape_fn((4, 4), |(r, c)| self.matrix[r][c])
    }

    /// Length of each voxel axis in world units.
    pub fn scaling(&self) -> [f64; 3] {
        let mut scaling = [0.0; 3];
        for (c, s) in scaling.iter_mut().enumerate() {
            *s = (0..3)
                .map(|r| self.matrix[r][c] * self.matrix[r][c])
                .sum::<f64>()
                .sqrt();
        }
        scaling
    }

    /// Direction cosines as columns, with the scaling removed.
    ///
    /// A column with zero scaling, as for a single slice, is left at zero.
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let scaling = self.scaling();
        let mut rotation = [[0.0; 3]; 3];
        for (r, row) in rotation.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                if scaling[c] > 0.0 {
                    *value = self.matrix[r][c] / scaling[c];
                }
            }
        }
        rotation
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.matrix[0][3], self.matrix[1][3], self.matrix[2][3]]
    }

    /// Diagonal of the upper-left 3×3 block.
    pub fn diagonal(&self) -> [f64; 3] {
        [self.matrix[0][0], self.matrix[1][1], self.matrix[2][2]]
    }

    pub fn voxel_to_world(&self, index: [f64; 3]) -> [f64; 3] {
        let mut world = self.translation();
        for (r, w) in world.iter_mut().enumerate() {
            *w += (0..3).map(|c| self.matrix[r][c] * index[c]).sum::<f64>();
        }
        world
    }
}

/// One axis of a spatial reference.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisReference {
    pub pixel_extent: f64,
    pub world_limits: [f64; 2],
    pub intrinsic_limits: [f64; 2],
    pub size: usize,
}

impl AxisReference {
    /// Axis whose first voxel center lies at `min_corner`.
    fn anchored(pixel_extent: f64, min_corner: f64, size: usize) -> Self {
        let start = min_corner - pixel_extent / 2.0;
        Self {
            pixel_extent,
            world_limits: [start, start + pixel_extent * size as f64],
            intrinsic_limits: [0.5, size as f64 + 0.5],
            size,
        }
    }

    pub fn image_extent(&self) -> f64 {
        self.world_limits[1] - self.world_limits[0]
    }

    /// World coordinate of an intrinsic (1-based, voxel-centered) coordinate.
    pub fn intrinsic_to_world(&self, intrinsic: f64) -> f64 {
        self.world_limits[0] + (intrinsic - self.intrinsic_limits[0]) * self.pixel_extent
    }

    pub fn world_to_intrinsic(&self, world: f64) -> f64 {
        self.intrinsic_limits[0] + (world - self.world_limits[0]) / self.pixel_extent
    }

    pub fn contains_world(&self, world: f64) -> bool {
        world >= self.world_limits[0] && world <= self.world_limits[1]
    }
}

/// Voxel-index to world mapping of a volume, voxel-center anchored.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialReference {
    pub x: AxisReference,
    pub y: AxisReference,
    pub z: AxisReference,
}

impl SpatialReference {
    /// Builds a reference from per-axis extents, the world position of the
    /// first voxel center, and the grid size.
    pub fn new(extent: [f64; 3], min_corner: [f64; 3], size: [usize; 3]) -> Result<Self> {
        for axis in 0..3 {
            if size[axis] == 0 {
                return Err(StitchError::InvalidSpatialReference(format!(
                    "grid size {size:?} is not positive"
                )));
            }
            if !(extent[axis] > 0.0 && extent[axis].is_finite()) {
                return Err(StitchError::InvalidSpatialReference(format!(
                    "pixel extent {extent:?} is not strictly positive"
                )));
            }
            if !min_corner[axis].is_finite() {
                return Err(StitchError::InvalidSpatialReference(format!(
                    "minimum corner {min_corner:?} is not finite"
                )));
            }
        }
        Ok(Self {
            x: AxisReference::anchored(extent[0], min_corner[0], size[0]),
            y: AxisReference::anchored(extent[1], min_corner[1], size[1]),
            z: AxisReference::anchored(extent[2], min_corner[2], size[2]),
        })
    }

    /// Reference of a volume stored with a supplied affine, as NIfTI files are.
    ///
    /// Extents are the magnitudes of the affine diagonal and the minimum
    /// corner is its translation column.
    pub fn from_affine(affine: &AffineTransform, dim: (usize, usize, usize)) -> Result<Self> {
        let diagonal = affine.diagonal().map(f64::abs);
        Self::new(diagonal, affine.translation(), [dim.0, dim.1, dim.2])
    }

    /// Reference of a volume stitched from DICOM slices.
    ///
    /// A single slice has no derived spacing; its thickness, or 1 when
    /// unknown, is used as the through-plane extent instead.
    pub fn from_slices(
        affine: &AffineTransform,
        dim: (usize, usize, usize),
        slice_thickness: Option<f64>,
    ) -> Result<Self> {
        let mut extent = affine.scaling();
        if extent[2] == 0.0 {
            extent[2] = slice_thickness.filter(|t| *t > 0.0).unwrap_or(1.0);
        }
        Self::new(extent, affine.translation(), [dim.0, dim.1, dim.2])
    }

    pub fn axes(&self) -> [&AxisReference; 3] {
        [&self.x, &self.y, &self.z]
    }

    pub fn pixel_extent(&self) -> [f64; 3] {
        self.axes().map(|a| a.pixel_extent)
    }

    pub fn size(&self) -> [usize; 3] {
        self.axes().map(|a| a.size)
    }

    pub fn voxel_count(&self) -> usize {
        self.size().iter().product()
    }

    pub fn intrinsic_to_world(&self, intrinsic: [f64; 3]) -> [f64; 3] {
        [
            self.x.intrinsic_to_world(intrinsic[0]),
            self.y.intrinsic_to_world(intrinsic[1]),
            self.z.intrinsic_to_world(intrinsic[2]),
        ]
    }

    pub fn world_to_intrinsic(&self, world: [f64; 3]) -> [f64; 3] {
        [
            self.x.world_to_intrinsic(world[0]),
            self.y.world_to_intrinsic(world[1]),
            self.z.world_to_intrinsic(world[2]),
        ]
    }
}
