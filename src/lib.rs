//! # DICOM-stitch library
//!
//! This crate turns loose 2D medical image slices into validated 3D volumes
//! that can be addressed in physical space.
//!
//! It builds on the dicom-rs ecosystem for reading DICOM files and on
//! nifti-rs for NIfTI volumes. A series of slices is checked to form a
//! uniform rectilinear grid, ordered along the slice normal and stacked
//! into a volume. Every volume carries:
//!  - An affine transform from voxel indices to patient coordinates
//!  - A spatial reference giving per-axis extents and world limits
//!  - The coordinate convention (LPS or RAS) of its voxels
//!
//! Regions of interest are kept as sparse flat voxel indices and can be
//! rebuilt into dense masks on demand.
//!
//! Whole directories are processed by the [`Pipeline`]: DICOM images are
//! grouped by series, structure sets are associated to their series, and
//! every series is reconstructed independently on a bounded rayon thread
//! pool. Series that fail validation are reported in the
//! [`ProcessingSummary`] without affecting the others.
//!
//! Slices are assumed to have the following properties:
//!   - Single frame (always the first frame is used)
//!   - One sample per pixel
//!
//! The library logs through the `log` facade and never installs a logger.
//!
//! # Examples
//!
//! ## Reading a directory of DICOM files into a volume
//!
//! ```no_run
//! # use dicom_stitch::{GeometryTolerances, VolumeLoader};
//! let volume = VolumeLoader::load_from_directory("dicom", &GeometryTolerances::default())
//!     .expect("should have loaded files from directory");
//! let reference = volume.spatial_ref();
//! println!("{:?} voxels, extents {:?}", volume.dim(), reference.pixel_extent());
//! ```
//!
//! ## Processing every series below a directory
//!
//! ```no_run
//! # use dicom_stitch::{Pipeline, StitchConfig};
//! let pipeline = Pipeline::new(StitchConfig::default().with_workers(4));
//! let output = pipeline
//!     .process_dicom_directory("patients")
//!     .expect("should have scanned the directory");
//! for failed in &output.summary.failed {
//!     eprintln!("{}: {}", failed.id, failed.reason);
//! }
//! ```

pub mod assembler;
pub mod associator;
pub mod config;
pub mod convention;
pub mod enums;
pub mod error;
pub mod nifti_loader;
pub mod ordering;
pub mod pipeline;
pub mod roi;
pub mod slice;
pub mod spatial;
mod tags;
pub mod validator;
pub mod volume;
pub mod volume_loader;

pub use assembler::VolumeGrid;
pub use associator::{MaskMatch, SeriesAssociator};
pub use config::{GeometryTolerances, StitchConfig};
pub use enums::{Convention, SourceFormat};
pub use error::{Result, StitchError};
pub use nifti_loader::NiftiLoader;
pub use pipeline::{Pipeline, PipelineOutput, ProcessedSeries, ProcessingSummary, ResultCollection};
pub use roi::{FlatIndices, RoiStore};
pub use slice::{SliceDescriptor, SliceHeader};
pub use spatial::{AffineTransform, SpatialReference};
pub use volume::Volume;
pub use volume_loader::VolumeLoader;
