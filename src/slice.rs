//! Per-slice metadata bundles, independent of the file encoding they were
//! read from.

use std::fmt;

use ndarray::Array2;

/// Storage layout of the pixel samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitDepth {
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub high_bit: u16,
    /// 0 for unsigned samples, 1 for two's complement.
    pub pixel_representation: u16,
}

impl BitDepth {
    pub fn is_signed(&self) -> bool {
        self.pixel_representation == 1
    }
}

/// Linear rescale attributes of a slice.
///
/// Either attribute may be absent; a missing slope defaults to 1 and a
/// missing intercept to 0 once the slice takes part in a rescaled volume.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rescale {
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
}

impl Rescale {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self {
            slope: Some(slope),
            intercept: Some(intercept),
        }
    }

    /// Whether the slice carries a slope or an intercept.
    pub fn is_present(&self) -> bool {
        self.slope.is_some() || self.intercept.is_some()
    }

    pub fn slope(&self) -> f64 {
        self.slope.unwrap_or(1.0)
    }

    pub fn intercept(&self) -> f64 {
        self.intercept.unwrap_or(0.0)
    }

    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        value * self.slope() as f32 + self.intercept() as f32
    }
}

/// Sample type of a pixel grid or volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl SampleKind {
    pub fn is_float(self) -> bool {
        matches!(self, SampleKind::F32)
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleKind::U8 => "u8",
            SampleKind::I8 => "i8",
            SampleKind::U16 => "u16",
            SampleKind::I16 => "i16",
            SampleKind::U32 => "u32",
            SampleKind::I32 => "i32",
            SampleKind::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// Raw stored samples of one plane, shape (rows, columns).
#[derive(Clone, Debug, PartialEq)]
pub enum PixelGrid {
    U8(Array2<u8>),
    I8(Array2<i8>),
    U16(Array2<u16>),
    I16(Array2<i16>),
    U32(Array2<u32>),
    I32(Array2<i32>),
}

impl PixelGrid {
    /// (rows, columns)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            PixelGrid::U8(p) => p.dim(),
            PixelGrid::I8(p) => p.dim(),
            PixelGrid::U16(p) => p.dim(),
            PixelGrid::I16(p) => p.dim(),
            PixelGrid::U32(p) => p.dim(),
            PixelGrid::I32(p) => p.dim(),
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            PixelGrid::U8(_) => SampleKind::U8,
            PixelGrid::I8(_) => SampleKind::I8,
            PixelGrid::U16(_) => SampleKind::U16,
            PixelGrid::I16(_) => SampleKind::I16,
            PixelGrid::U32(_) => SampleKind::U32,
            PixelGrid::I32(_) => SampleKind::I32,
        }
    }

    /// Samples converted to `f32` with the given rescale applied.
    pub fn rescaled(&self, rescale: &Rescale) -> Array2<f32> {
        match self {
            PixelGrid::U8(p) => p.mapv(|v| rescale.apply(v as f32)),
            PixelGrid::I8(p) => p.mapv(|v| rescale.apply(v as f32)),
            PixelGrid::U16(p) => p.mapv(|v| rescale.apply(v as f32)),
            PixelGrid::I16(p) => p.mapv(|v| rescale.apply(v as f32)),
            PixelGrid::U32(p) => p.mapv(|v| rescale.apply(v as f32)),
            PixelGrid::I32(p) => p.mapv(|v| rescale.apply(v as f32)),
        }
    }
}

/// Geometric and identity attributes of one slice.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceHeader {
    pub series_uid: String,
    pub sop_class_uid: String,
    pub modality: String,
    pub frame_of_reference_uid: Option<String>,
    pub rows: u16,
    pub columns: u16,
    /// (row spacing, column spacing) in mm.
    pub pixel_spacing: [f64; 2],
    pub row_cosine: [f64; 3],
    pub column_cosine: [f64; 3],
    /// Center of the first transmitted voxel, in patient coordinates.
    pub position: [f64; 3],
    pub bit_depth: BitDepth,
    pub rescale: Rescale,
    pub slice_thickness: Option<f64>,
}

impl SliceHeader {
    /// Row and column cosines concatenated, as stored by DICOM.
    pub fn orientation(&self) -> [f64; 6] {
        let [a, b, c] = self.row_cosine;
        let [d, e, f] = self.column_cosine;
        [a, b, c, d, e, f]
    }
}

/// One 2D plane of a series.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceDescriptor {
    pub header: SliceHeader,
    pub pixels: PixelGrid,
}

impl SliceDescriptor {
    pub fn new(header: SliceHeader, pixels: PixelGrid) -> Self {
        Self { header, pixels }
    }
}
