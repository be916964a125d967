use dicom_stitch::slice::{BitDepth, PixelGrid, Rescale, SliceDescriptor, SliceHeader};
use ndarray::Array2;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Signed 16-bit CT slice with the given cosines and position.
pub fn slice(
    row_cosine: [f64; 3],
    column_cosine: [f64; 3],
    position: [f64; 3],
    pixels: Array2<i16>,
) -> SliceDescriptor {
    let (rows, columns) = pixels.dim();
    SliceDescriptor::new(
        SliceHeader {
            series_uid: "1.3.6.1.4.1.5962.99".to_string(),
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_string(),
            modality: "CT".to_string(),
            frame_of_reference_uid: Some("1.3.6.1.4.1.5962.7".to_string()),
            rows: rows as u16,
            columns: columns as u16,
            pixel_spacing: [1.0, 1.0],
            row_cosine,
            column_cosine,
            position,
            bit_depth: BitDepth {
                bits_allocated: 16,
                bits_stored: 16,
                high_bit: 15,
                pixel_representation: 1,
            },
            rescale: Rescale::default(),
            slice_thickness: None,
        },
        PixelGrid::I16(pixels),
    )
}

/// Axial 2×2 slice at height `z` filled with `value`.
pub fn axial(z: f64, value: i16) -> SliceDescriptor {
    slice(
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, z],
        Array2::from_elem((2, 2), value),
    )
}
