use crate::{
    assembler::{Assembly, assemble},
    config::GeometryTolerances,
    enums::SourceFormat,
    error::{Result, StitchError},
    slice::{BitDepth, PixelGrid, Rescale, SliceDescriptor, SliceHeader},
    spatial::{AffineTransform, SpatialReference},
    tags::{get_f64_value, get_string_value, get_u16_value, require_f64_array, require_string, require_u16},
    validator::validate_uniform_grid,
    volume::Volume,
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::{debug, info};
use ndarray::s;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from already decoded slices
    ///
    /// The slices may come in any order. They are validated as one uniform
    /// grid, stacked along the slice normal, and given an affine transform
    /// and a spatial reference in the patient (LPS) convention.
    ///
    /// # Errors
    ///
    /// Returns error if the slices do not form a uniform grid
    pub fn load_from_slices(
        slices: &[SliceDescriptor],
        tolerances: &GeometryTolerances,
    ) -> Result<Volume> {
        validate_uniform_grid(slices, tolerances)?;

        let Assembly {
            grid,
            order,
            mixed_rescale,
        } = assemble(slices)?;

        let affine = AffineTransform::from_slices(slices, &order)?;
        let first = &order
            .first()
            .and_then(|index| slices.get(index))
            .ok_or(StitchError::NoSlices)?
            .header;
        let spatial_ref =
            SpatialReference::from_slices(&affine, grid.dim(), first.slice_thickness)?;

        debug!(
            "Assembled series {} into {:?} {} voxels, slice spacing {}",
            first.series_uid,
            grid.dim(),
            grid.kind(),
            order.spacing
        );

        Ok(Volume::new(grid, spatial_ref, affine, SourceFormat::Dicom)
            .with_mixed_rescale(mixed_rescale))
    }

    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects, one per image
    /// * `tolerances` - Thresholds for the geometry checks
    ///
    /// # Errors
    ///
    /// Returns error if an object lacks a required attribute, its pixel data
    /// cannot be decoded, or the slices do not form a uniform grid
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        tolerances: &GeometryTolerances,
    ) -> Result<Volume> {
        let slices = dicom_objects
            .par_iter()
            .map(Self::read_slice)
            .collect::<Result<Vec<_>>>()?;

        Self::load_from_slices(&slices, tolerances)
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        tolerances: &GeometryTolerances,
    ) -> Result<Volume> {
        let slices = paths
            .par_iter()
            .map(|path| {
                let dicom_object = open_file(path.as_ref())?;
                Self::read_slice(&dicom_object)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::load_from_slices(&slices, tolerances)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        tolerances: &GeometryTolerances,
    ) -> Result<Volume> {
        let paths: Vec<PathBuf> = fs::read_dir(path.as_ref())?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(StitchError::NoSlices);
        }
        info!(
            "Loading {} DICOM files from {}",
            paths.len(),
            path.as_ref().display()
        );

        Self::load_from_file_paths(&paths, tolerances)
    }

    /// Reads the header and the stored pixel samples of one image.
    pub fn read_slice(dicom_object: &FileDicomObject<InMemDicomObject>) -> Result<SliceDescriptor> {
        let header = Self::read_header(dicom_object)?;
        let pixels = Self::decode_pixels(dicom_object, &header.bit_depth)?;

        if pixels.dim() != (header.rows as usize, header.columns as usize) {
            return Err(StitchError::PixelDecode(format!(
                "decoded plane of {:?} does not match {} rows and {} columns",
                pixels.dim(),
                header.rows,
                header.columns
            )));
        }
        Ok(SliceDescriptor::new(header, pixels))
    }

    /// Reads the attributes the geometry checks and the assembler need.
    ///
    /// Optional attributes (rescale, frame of reference, slice thickness)
    /// are left empty when absent.
    pub fn read_header(dcm: &InMemDicomObject) -> Result<SliceHeader> {
        let [r0, r1, r2, c0, c1, c2] =
            require_f64_array::<6>(dcm, tags::IMAGE_ORIENTATION_PATIENT, "ImageOrientationPatient")?;

        Ok(SliceHeader {
            series_uid: require_string(dcm, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?,
            sop_class_uid: require_string(dcm, tags::SOP_CLASS_UID, "SOPClassUID")?,
            modality: require_string(dcm, tags::MODALITY, "Modality")?,
            frame_of_reference_uid: get_string_value(dcm, tags::FRAME_OF_REFERENCE_UID),
            rows: require_u16(dcm, tags::ROWS, "Rows")?,
            columns: require_u16(dcm, tags::COLUMNS, "Columns")?,
            pixel_spacing: require_f64_array::<2>(dcm, tags::PIXEL_SPACING, "PixelSpacing")?,
            row_cosine: [r0, r1, r2],
            column_cosine: [c0, c1, c2],
            position: require_f64_array::<3>(dcm, tags::IMAGE_POSITION_PATIENT, "ImagePositionPatient")?,
            bit_depth: BitDepth {
                bits_allocated: require_u16(dcm, tags::BITS_ALLOCATED, "BitsAllocated")?,
                bits_stored: require_u16(dcm, tags::BITS_STORED, "BitsStored")?,
                high_bit: require_u16(dcm, tags::HIGH_BIT, "HighBit")?,
                pixel_representation: require_u16(
                    dcm,
                    tags::PIXEL_REPRESENTATION,
                    "PixelRepresentation",
                )?,
            },
            rescale: Rescale {
                slope: get_f64_value(dcm, tags::RESCALE_SLOPE),
                intercept: get_f64_value(dcm, tags::RESCALE_INTERCEPT),
            },
            slice_thickness: get_f64_value(dcm, tags::SLICE_THICKNESS),
        })
    }

    fn decode_pixels(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        bit_depth: &BitDepth,
    ) -> Result<PixelGrid> {
        let samples_per_pixel = get_u16_value(dicom_object, tags::SAMPLES_PER_PIXEL).unwrap_or(1);
        if samples_per_pixel != 1 {
            return Err(StitchError::UnsupportedPixelData(format!(
                "{samples_per_pixel} samples per pixel"
            )));
        }

        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|e| StitchError::PixelDecode(e.to_string()))?;
        // Stored values only: rescale is applied by the assembler.
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);

        macro_rules! first_plane {
            ($variant:ident, $t:ty) => {
                PixelGrid::$variant(
                    pixel_data
                        .to_ndarray_with_options::<$t>(&options)
                        .map_err(|e| StitchError::PixelDecode(e.to_string()))?
                        .slice_move(s![0, .., .., 0]),
                )
            };
        }

        Ok(match (bit_depth.bits_allocated, bit_depth.is_signed()) {
            (8, false) => first_plane!(U8, u8),
            (8, true) => first_plane!(I8, i8),
            (16, false) => first_plane!(U16, u16),
            (16, true) => first_plane!(I16, i16),
            (32, false) => first_plane!(U32, u32),
            (32, true) => first_plane!(I32, i32),
            (bits, _) => {
                return Err(StitchError::UnsupportedPixelData(format!(
                    "{bits} bits allocated"
                )));
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::fixtures::axial_slice;
    use fixtures::ct_file;

    #[test]
    fn test_read_header() {
        let file = ct_file("1.2.3.4", 1, 7.5, 2, 3, &[0; 6]);
        let header = VolumeLoader::read_header(&file).unwrap();
        assert_eq!(header.series_uid, "1.2.3.4");
        assert_eq!(header.modality, "CT");
        assert_eq!((header.rows, header.columns), (2, 3));
        assert_eq!(header.position, [0.0, 0.0, 7.5]);
        assert_eq!(header.row_cosine, [1.0, 0.0, 0.0]);
        assert_eq!(header.column_cosine, [0.0, 1.0, 0.0]);
        assert_eq!(header.slice_thickness, Some(2.0));
        assert!(!header.rescale.is_present());
        assert_eq!(header.frame_of_reference_uid.as_deref(), Some("1.2.3.9"));
    }

    #[test]
    fn test_missing_attribute() {
        let dcm = InMemDicomObject::new_empty();
        assert!(matches!(
            VolumeLoader::read_header(&dcm),
            Err(StitchError::MissingAttribute("ImageOrientationPatient"))
        ));
    }

    #[test]
    fn test_read_slice_keeps_stored_values() {
        let file = ct_file("1.2.3.4", 1, 0.0, 2, 3, &[0, 1, 2, 300, 400, 65535]);
        let slice = VolumeLoader::read_slice(&file).unwrap();
        match slice.pixels {
            PixelGrid::U16(plane) => {
                assert_eq!(plane.dim(), (2, 3));
                assert_eq!(plane[[0, 2]], 2);
                assert_eq!(plane[[1, 0]], 300);
                assert_eq!(plane[[1, 2]], 65535);
            }
            other => panic!("unexpected pixel grid {:?}", other.kind()),
        }
    }

    #[test]
    fn test_load_from_dicom_objects_unordered() {
        let objects = vec![
            ct_file("1.2.3.4", 3, 4.0, 2, 2, &[3; 4]),
            ct_file("1.2.3.4", 1, 0.0, 2, 2, &[1; 4]),
            ct_file("1.2.3.4", 2, 2.0, 2, 2, &[2; 4]),
        ];
        let volume =
            VolumeLoader::load_from_dicom_objects(&objects, &GeometryTolerances::default())
                .unwrap();

        assert_eq!(volume.dim(), (2, 2, 3));
        let data = volume.data().as_u16().unwrap();
        assert_eq!(data[[0, 0, 0]], 1);
        assert_eq!(data[[1, 1, 2]], 3);
        assert_eq!(volume.spatial_ref().z.pixel_extent, 2.0);
        assert_eq!(volume.source(), SourceFormat::Dicom);
    }

    #[test]
    fn test_single_slice_uses_thickness() {
        let mut slices = vec![axial_slice(5.0, 2, 2, 1)];
        slices[0].header.slice_thickness = Some(3.0);
        let volume =
            VolumeLoader::load_from_slices(&slices, &GeometryTolerances::default()).unwrap();
        assert_eq!(volume.dim(), (2, 2, 1));
        assert_eq!(volume.spatial_ref().z.pixel_extent, 3.0);
    }

    #[test]
    fn test_mixed_rescale_is_flagged() {
        let mut slices = vec![axial_slice(0.0, 2, 2, 10), axial_slice(1.0, 2, 2, 10)];
        slices[1].header.rescale = Rescale::new(2.0, -5.0);
        let volume =
            VolumeLoader::load_from_slices(&slices, &GeometryTolerances::default()).unwrap();
        assert!(volume.mixed_rescale());
        let data = volume.data().as_f32().unwrap();
        assert_eq!(data[[0, 0, 0]], 10.0);
        assert_eq!(data[[0, 0, 1]], 15.0);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for (i, z) in [0.0, 1.5, 3.0].into_iter().enumerate() {
            ct_file("1.2.3.4", i as u32, z, 2, 2, &[i as u16; 4])
                .write_to_file(dir.path().join(format!("slice{i}.dcm")))
                .unwrap();
        }
        std::fs::write(dir.path().join("README.txt"), b"ignored").unwrap();

        let volume =
            VolumeLoader::load_from_directory(dir.path(), &GeometryTolerances::default()).unwrap();
        assert_eq!(volume.dim(), (2, 2, 3));
        assert_eq!(volume.spatial_ref().z.pixel_extent, 1.5);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            VolumeLoader::load_from_directory(dir.path(), &GeometryTolerances::default()),
            Err(StitchError::NoSlices)
        ));
    }
}
