use std::path::PathBuf;

use thiserror::Error;

/// Result type for stitching operations
pub type Result<T> = std::result::Result<T, StitchError>;

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("No slices were given for the series")]
    NoSlices,

    /// An attribute that must be shared by every slice of a series differs.
    #[error("All slices must have the same value for \"{attribute}\": {found} != {expected}")]
    GridInconsistency {
        attribute: &'static str,
        expected: String,
        found: String,
    },

    #[error("It appears there are missing slices: step {step} deviates from first step {first_step}")]
    MissingSlices { first_step: f64, step: f64 },

    #[error("Degenerate image orientation: {0}")]
    OrientationDegenerate(String),

    #[error("Mask file {0} matches no series")]
    AssociationAmbiguous(PathBuf),

    #[error("Invalid spatial reference: {0}")]
    InvalidSpatialReference(String),

    #[error("ROI was extracted from {source_voxels} voxels but the target grid has {target_voxels}")]
    VoxelCountMismatch {
        source_voxels: usize,
        target_voxels: usize,
    },

    #[error("ROI index {index} lies outside a grid of {voxel_count} voxels")]
    IndexOutOfBounds { index: usize, voxel_count: usize },

    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Unsupported pixel data: {0}")]
    UnsupportedPixelData(String),

    #[error("Pixel data decoding failed: {0}")]
    PixelDecode(String),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

impl StitchError {
    /// Whether the error comes from a geometric check of the slice grid.
    pub fn is_geometry_error(&self) -> bool {
        matches!(
            self,
            StitchError::GridInconsistency { .. }
                | StitchError::MissingSlices { .. }
                | StitchError::OrientationDegenerate(_)
        )
    }
}
