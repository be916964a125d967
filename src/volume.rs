use log::debug;

use crate::{
    assembler::VolumeGrid,
    convention::{flip_grid, swap_in_plane_axes},
    enums::{Convention, SourceFormat},
    spatial::{AffineTransform, SpatialReference},
};

/// A reconstructed series: voxels, spatial reference and affine transform.
///
/// The affine keeps describing the source's own convention; only the
/// voxels and the spatial reference follow a convention conversion.
#[derive(Clone, Debug)]
pub struct Volume {
    data: VolumeGrid,
    spatial_ref: SpatialReference,
    affine: AffineTransform,
    convention: Convention,
    source: SourceFormat,
    mixed_rescale: bool,
}

impl Volume {
    pub fn new(
        data: VolumeGrid,
        spatial_ref: SpatialReference,
        affine: AffineTransform,
        source: SourceFormat,
    ) -> Self {
        Self {
            data,
            spatial_ref,
            affine,
            convention: source.native_convention(),
            source,
            mixed_rescale: false,
        }
    }

    pub(crate) fn with_mixed_rescale(mut self, mixed_rescale: bool) -> Self {
        self.mixed_rescale = mixed_rescale;
        self
    }

    /// Get the dimensions of the volume (columns, rows, slices)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn voxel_count(&self) -> usize {
        self.data.voxel_count()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &VolumeGrid {
        &self.data
    }

    pub fn spatial_ref(&self) -> &SpatialReference {
        &self.spatial_ref
    }

    pub fn affine(&self) -> &AffineTransform {
        &self.affine
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn source(&self) -> SourceFormat {
        self.source
    }

    /// Whether the series mixed rescaled and non-rescaled slices.
    pub fn mixed_rescale(&self) -> bool {
        self.mixed_rescale
    }

    /// Converts voxels and spatial reference to `target`.
    ///
    /// Consumes the volume so that the conversion is the last change it sees.
    pub fn convert_to(self, target: Convention) -> Self {
        if self.convention == target {
            return self;
        }
        debug!("Converting volume from {} to {}", self.convention, target);
        Self {
            data: flip_grid(&self.data),
            spatial_ref: swap_in_plane_axes(&self.spatial_ref),
            convention: target,
            ..self
        }
    }
}
