//! NIfTI ingestion: image volumes, their affine, and ROI mask files.
//!
//! Files follow the naming scheme
//! `<PatientID>__<ScanName>(<label>).<ScanType>.nii[.gz]` for images and
//! `<PatientID>__<NameSet>(<RoiName>).ROI.nii[.gz]` for masks. A mask
//! belongs to every image whose name shares the text before `(`.
//!
//! NIfTI stores voxels in RAS; volumes and masks are handed out in LPS.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use ndarray::Array3;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{
    assembler::VolumeGrid,
    convention::flip_in_plane,
    enums::{Convention, SourceFormat},
    error::{Result, StitchError},
    roi::{FlatIndices, RoiStore},
    spatial::{AffineTransform, SpatialReference},
    volume::Volume,
};

const MASK_COMPONENT: &str = "ROI";
const NIFTI_EXTENSIONS: &[&str] = &[".nii.gz", ".nii"];

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn strip_nifti_extension(name: &str) -> Option<&str> {
    NIFTI_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
}

/// Whether one of the `.`-separated components of `name` is `ROI`.
pub fn is_mask_name(name: &str) -> bool {
    name.split('.').any(|component| component == MASK_COMPONENT)
}

/// Identity of an image file, taken from its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFileName {
    pub patient_id: String,
    /// Last component before the extension, e.g. `CTscan`.
    pub scan_type: String,
    /// `<PatientID>__<ScanName>`, shared with the image's mask files.
    pub prefix: String,
}

impl ImageFileName {
    pub fn parse(name: &str) -> Option<Self> {
        if is_mask_name(name) {
            return None;
        }
        let stem = strip_nifti_extension(name)?;
        let patient_id = name.split('_').next()?.to_string();
        let scan_type = stem.rsplit('.').next()?.to_string();
        let prefix = match name.find('(') {
            Some(end) => &name[..end],
            None => name.split('.').next()?,
        };

        Some(Self {
            patient_id,
            scan_type,
            prefix: prefix.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        file_name(path).and_then(Self::parse)
    }

    /// Whether `mask_name` names a mask of this image.
    pub fn owns_mask(&self, mask_name: &str) -> bool {
        mask_name.starts_with(&self.prefix) && is_mask_name(mask_name)
    }
}

/// ROI name and name set of a mask file, taken from its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskFileName {
    pub roi_name: String,
    pub name_set: String,
}

impl MaskFileName {
    pub fn parse(name: &str) -> Option<Self> {
        if !is_mask_name(name) {
            return None;
        }
        let open = name.find('(')?;
        let close = name.find(')')?;
        let name_set_start = name.find('_')? + 2;
        if close < open || name_set_start > open {
            return None;
        }

        Some(Self {
            roi_name: name[open + 1..close].to_string(),
            name_set: name[name_set_start..open].to_string(),
        })
    }
}

/// Image and mask files found below a directory, sorted by path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NiftiFiles {
    pub images: Vec<PathBuf>,
    pub masks: Vec<PathBuf>,
}

impl NiftiFiles {
    /// Finds `.nii` and `.nii.gz` files recursively.
    pub fn scan_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let mut files = Self::default();
        files.collect(dir.as_ref())?;
        files.images.sort();
        files.masks.sort();
        info!(
            "Found {} NIfTI images and {} masks in {}",
            files.images.len(),
            files.masks.len(),
            dir.as_ref().display()
        );
        Ok(files)
    }

    fn collect(&mut self, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path)?;
                continue;
            }
            let Some(name) = file_name(&path) else {
                continue;
            };
            if strip_nifti_extension(name).is_none() {
                continue;
            }
            if is_mask_name(name) {
                self.masks.push(path);
            } else {
                self.images.push(path);
            }
        }
        Ok(())
    }

    /// Masks belonging to `image`.
    pub fn masks_of<'a>(&'a self, image: &'a ImageFileName) -> impl Iterator<Item = &'a PathBuf> {
        self.masks
            .iter()
            .filter(|path| file_name(path).is_some_and(|name| image.owns_mask(name)))
    }
}

/// Voxel to world transform stored in a NIfTI header.
///
/// The sform rows are used when `sform_code` is set. Otherwise the voxel
/// sizes and the qform offsets (`quatern_*`) give an axis-aligned transform.
pub fn affine_from_header(header: &NiftiHeader) -> AffineTransform {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let mut matrix = [[0.0, 0.0, 0.0, 1.0]; 4];
        for (row, srow) in matrix.iter_mut().zip(rows) {
            *row = srow.map(f64::from);
        }
        return AffineTransform::from_matrix(matrix);
    }

    let voxel_size = |d: f32| if d > 0.0 { f64::from(d) } else { 1.0 };
    let mut matrix = *AffineTransform::default().matrix();
    for axis in 0..3 {
        matrix[axis][axis] = voxel_size(header.pixdim[axis + 1]);
    }
    matrix[0][3] = f64::from(header.quatern_x);
    matrix[1][3] = f64::from(header.quatern_y);
    matrix[2][3] = f64::from(header.quatern_z);
    AffineTransform::from_matrix(matrix)
}

pub struct NiftiLoader;

impl NiftiLoader {
    /// Reads the voxels of a NIfTI file as `f32` along with its affine.
    ///
    /// Trailing unit dimensions are dropped; anything beyond three
    /// dimensions otherwise is rejected.
    pub fn read_file(path: impl AsRef<Path>) -> Result<(Array3<f32>, AffineTransform)> {
        let path = path.as_ref();
        let obj = ReaderOptions::new().read_file(path)?;
        let affine = affine_from_header(obj.header());
        let data = obj.into_volume().into_ndarray::<f32>()?;

        let shape = data.shape();
        if shape.len() < 3 || shape[3..].iter().any(|&d| d != 1) {
            return Err(StitchError::UnsupportedPixelData(format!(
                "{} has shape {shape:?}, expected a 3D volume",
                path.display()
            )));
        }
        let dim = (shape[0], shape[1], shape[2]);
        let data = Array3::from_shape_vec(dim, data.iter().copied().collect())?;

        Ok((data, affine))
    }

    /// Loads an image volume and converts it to LPS.
    ///
    /// The affine keeps describing the file's RAS voxel order.
    pub fn load_volume(path: impl AsRef<Path>) -> Result<Volume> {
        let (data, affine) = Self::read_file(path.as_ref())?;
        let spatial_ref = SpatialReference::from_affine(&affine, data.dim())?;
        debug!(
            "Read {} with shape {:?}",
            path.as_ref().display(),
            data.dim()
        );

        let volume = Volume::new(
            VolumeGrid::F32(data),
            spatial_ref,
            affine,
            SourceFormat::Nifti,
        );
        Ok(volume.convert_to(Convention::Lps))
    }

    /// Reads the masks of one image into a store, keyed from 0 in the order
    /// of `mask_paths`.
    ///
    /// Masks are flipped to LPS before their nonzero voxels are taken, so
    /// the indices address the converted image volume.
    pub fn load_rois(mask_paths: &[impl AsRef<Path>]) -> Result<RoiStore> {
        let mut store = RoiStore::new();

        for path in mask_paths {
            let path = path.as_ref();
            let Some(mask_name) = file_name(path).and_then(MaskFileName::parse) else {
                warn!("Skipping mask with malformed name: {}", path.display());
                continue;
            };

            let (data, _) = Self::read_file(path)?;
            let indices = FlatIndices::from_mask(flip_in_plane(&data).view());
            debug!(
                "ROI {} of {}: {} voxels",
                mask_name.roi_name,
                mask_name.name_set,
                indices.indices.len()
            );

            let key = store.next_key();
            store.update(key, indices);
            store.update_name(key, mask_name.roi_name);
            store.update_name_set(key, mask_name.name_set);
        }

        Ok(store)
    }

    /// Loads an image and the masks of `files` that belong to it.
    pub fn load_image_with_rois(path: &Path, files: &NiftiFiles) -> Result<(Volume, RoiStore)> {
        let volume = Self::load_volume(path)?;
        let rois = match ImageFileName::from_path(path) {
            Some(image) => {
                let masks: Vec<_> = files.masks_of(&image).collect();
                Self::load_rois(&masks)?
            }
            None => {
                warn!("Image name does not follow the naming scheme: {}", path.display());
                RoiStore::new()
            }
        };

        for (key, record) in rois.records() {
            if record.source_voxel_count != volume.voxel_count() {
                warn!(
                    "ROI {key} of {} has {} voxels, image has {}",
                    path.display(),
                    record.source_voxel_count,
                    volume.voxel_count()
                );
            }
        }
        Ok((volume, rois))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nifti::writer::WriterOptions;
    use rstest::rstest;

    #[rstest]
    #[case("Glioma-TCGA-001__T1(tumorAuto).MRscan.nii.gz", "Glioma-TCGA-001", "MRscan", "Glioma-TCGA-001__T1")]
    #[case("STS-McGill-002__CT(full).CTscan.nii", "STS-McGill-002", "CTscan", "STS-McGill-002__CT")]
    #[case("P1__PET.PTscan.nii.gz", "P1", "PTscan", "P1__PET")]
    fn test_parse_image_name(
        #[case] name: &str,
        #[case] patient_id: &str,
        #[case] scan_type: &str,
        #[case] prefix: &str,
    ) {
        let image = ImageFileName::parse(name).unwrap();
        assert_eq!(image.patient_id, patient_id);
        assert_eq!(image.scan_type, scan_type);
        assert_eq!(image.prefix, prefix);
    }

    #[test]
    fn test_parse_mask_name() {
        let mask = MaskFileName::parse("Glioma-TCGA-001__T1(GTV).ROI.nii.gz").unwrap();
        assert_eq!(mask.roi_name, "GTV");
        assert_eq!(mask.name_set, "T1");
        assert!(ImageFileName::parse("Glioma-TCGA-001__T1(GTV).ROI.nii.gz").is_none());
    }

    #[rstest]
    #[case("P1__T1.MRscan.nii.gz")]
    #[case("P1__T1)GTV(.ROI.nii")]
    #[case("P1T1(GTV).ROI.nii")]
    fn test_malformed_mask_name(#[case] name: &str) {
        assert!(MaskFileName::parse(name).is_none());
    }

    #[test]
    fn test_mask_ownership() {
        let image = ImageFileName::parse("P1__T1(auto).MRscan.nii.gz").unwrap();
        assert!(image.owns_mask("P1__T1(GTV).ROI.nii.gz"));
        assert!(!image.owns_mask("P1__T2(GTV).ROI.nii.gz"));
        assert!(!image.owns_mask("P1__T1(auto).MRscan.nii.gz"));
    }

    #[test]
    fn test_affine_from_sform() {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [-0.5, 0.0, 0.0, 10.0];
        header.srow_y = [0.0, -0.5, 0.0, 20.0];
        header.srow_z = [0.0, 0.0, 2.0, -30.0];

        let affine = affine_from_header(&header);
        assert_eq!(affine.diagonal(), [-0.5, -0.5, 2.0]);
        assert_eq!(affine.translation(), [10.0, 20.0, -30.0]);
        assert_eq!(affine.matrix()[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_affine_without_sform() {
        let mut header = NiftiHeader::default();
        header.sform_code = 0;
        header.pixdim = [1.0, 0.8, 0.9, 0.0, 1.0, 1.0, 1.0, 1.0];
        header.quatern_x = 4.0;

        let affine = affine_from_header(&header);
        assert_eq!(affine.diagonal(), [0.8f32 as f64, 0.9f32 as f64, 1.0]);
        assert_eq!(affine.translation(), [4.0, 0.0, 0.0]);
    }

    fn write_volume(path: &Path, data: &Array3<f32>) {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [2.0, 0.0, 0.0, -10.0];
        header.srow_y = [0.0, 2.0, 0.0, -20.0];
        header.srow_z = [0.0, 0.0, 3.0, 5.0];
        // the writer swaps the component before `.nii`, e.g. `.ROI`
        let staged = path.with_file_name("staged.nii");
        WriterOptions::new(&staged)
            .reference_header(&header)
            .write_nifti(data)
            .unwrap();
        fs::rename(&staged, path).unwrap();
    }

    #[test]
    fn test_load_volume_and_rois() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("P1__CT(auto).CTscan.nii");
        let image = Array3::from_shape_fn((3, 2, 2), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        write_volume(&image_path, &image);

        let mut mask = Array3::<f32>::zeros((3, 2, 2));
        mask[[0, 0, 1]] = 1.0;
        write_volume(&dir.path().join("P1__CT(GTV).ROI.nii"), &mask);
        write_volume(&dir.path().join("P2__CT(GTV).ROI.nii"), &mask);

        let files = NiftiFiles::scan_directory(dir.path()).unwrap();
        assert_eq!(files.images, vec![image_path.clone()]);
        assert_eq!(files.masks.len(), 2);

        let (volume, rois) = NiftiLoader::load_image_with_rois(&image_path, &files).unwrap();
        assert_eq!(volume.convention(), Convention::Lps);
        assert_eq!(volume.dim(), (3, 2, 2));
        let data = volume.data().as_f32().unwrap();
        assert_eq!(data[[0, 0, 0]], image[[2, 1, 0]]);
        assert_eq!(volume.affine().translation(), [-10.0, -20.0, 5.0]);
        assert_eq!(volume.spatial_ref().z.pixel_extent, 3.0);

        assert_eq!(rois.len(), 1);
        let record = rois.record(0).unwrap();
        assert_eq!(record.name.as_deref(), Some("GTV"));
        assert_eq!(record.name_set.as_deref(), Some("CT"));
        // (0, 0, 1) lands on (2, 1, 1) once flipped
        assert_eq!(record.indices, vec![2 * 4 + 2 + 1]);
        assert_eq!(record.source_voxel_count, 12);
    }
}
