//! Merges ordered 2D pixel grids into a 3D volume.

use log::warn;
use ndarray::{Array2, Array3, ArrayView2, Axis, s};

use crate::{
    error::{Result, StitchError},
    ordering::{SliceOrder, resolve_order},
    slice::{PixelGrid, SampleKind, SliceDescriptor},
};

/// Reconstructed voxels, shape (columns, rows, slices).
#[derive(Clone, Debug, PartialEq)]
pub enum VolumeGrid {
    U8(Array3<u8>),
    I8(Array3<i8>),
    U16(Array3<u16>),
    I16(Array3<i16>),
    U32(Array3<u32>),
    I32(Array3<i32>),
    F32(Array3<f32>),
}

/// Applies an expression to the array of every variant, rewrapping the
/// result in the same variant.
macro_rules! map_grid {
    ($grid:expr, $data:ident => $body:expr) => {
        match $grid {
            VolumeGrid::U8($data) => VolumeGrid::U8($body),
            VolumeGrid::I8($data) => VolumeGrid::I8($body),
            VolumeGrid::U16($data) => VolumeGrid::U16($body),
            VolumeGrid::I16($data) => VolumeGrid::I16($body),
            VolumeGrid::U32($data) => VolumeGrid::U32($body),
            VolumeGrid::I32($data) => VolumeGrid::I32($body),
            VolumeGrid::F32($data) => VolumeGrid::F32($body),
        }
    };
}

/// Evaluates an expression against the array of any variant.
macro_rules! with_grid {
    ($grid:expr, $data:ident => $body:expr) => {
        match $grid {
            VolumeGrid::U8($data) => $body,
            VolumeGrid::I8($data) => $body,
            VolumeGrid::U16($data) => $body,
            VolumeGrid::I16($data) => $body,
            VolumeGrid::U32($data) => $body,
            VolumeGrid::I32($data) => $body,
            VolumeGrid::F32($data) => $body,
        }
    };
}

pub(crate) use map_grid;

impl VolumeGrid {
    /// (columns, rows, slices)
    pub fn dim(&self) -> (usize, usize, usize) {
        with_grid!(self, data => data.dim())
    }

    pub fn voxel_count(&self) -> usize {
        with_grid!(self, data => data.len())
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            VolumeGrid::U8(_) => SampleKind::U8,
            VolumeGrid::I8(_) => SampleKind::I8,
            VolumeGrid::U16(_) => SampleKind::U16,
            VolumeGrid::I16(_) => SampleKind::I16,
            VolumeGrid::U32(_) => SampleKind::U32,
            VolumeGrid::I32(_) => SampleKind::I32,
            VolumeGrid::F32(_) => SampleKind::F32,
        }
    }

    pub fn is_float(&self) -> bool {
        self.kind().is_float()
    }

    pub fn as_f32(&self) -> Option<&Array3<f32>> {
        match self {
            VolumeGrid::F32(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<&Array3<u16>> {
        match self {
            VolumeGrid::U16(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<&Array3<i16>> {
        match self {
            VolumeGrid::I16(data) => Some(data),
            _ => None,
        }
    }

    /// Copy of the voxels as `f32`, whatever the stored type.
    pub fn to_f32(&self) -> Array3<f32> {
        with_grid!(self, data => data.mapv(|v| v as f32))
    }
}

/// Output of the assembler.
#[derive(Clone, Debug)]
pub struct Assembly {
    pub grid: VolumeGrid,
    pub order: SliceOrder,
    /// Some slices carry rescale attributes while others do not.
    pub mixed_rescale: bool,
}

/// Resolves the slice order, then fills the volume in that order.
pub fn assemble(slices: &[SliceDescriptor]) -> Result<Assembly> {
    let order = resolve_order(slices)?;
    assemble_ordered(slices, order)
}

/// Fills a volume from slices whose order is already resolved.
pub fn assemble_ordered(slices: &[SliceDescriptor], order: SliceOrder) -> Result<Assembly> {
    let first = slices.first().ok_or(StitchError::NoSlices)?;
    let rows = first.header.rows as usize;
    let columns = first.header.columns as usize;

    for slice in slices {
        if slice.pixels.dim() != (rows, columns) {
            return Err(StitchError::UnsupportedPixelData(format!(
                "pixel grid of {:?} does not match {rows} rows and {columns} columns",
                slice.pixels.dim()
            )));
        }
    }

    let rescaled = slices
        .iter()
        .filter(|slice| slice.header.rescale.is_present())
        .count();
    let mixed_rescale = rescaled > 0 && rescaled < slices.len();
    if mixed_rescale {
        warn!(
            "Series {} mixes rescaled and non-rescaled slices ({rescaled} of {}), defaults applied to the rest",
            first.header.series_uid,
            slices.len()
        );
    }

    let grid = if rescaled > 0 {
        let planes: Vec<Array2<f32>> = order
            .order
            .iter()
            .map(|&i| slices[i].pixels.rescaled(&slices[i].header.rescale))
            .collect();
        VolumeGrid::F32(stack_planes(
            &planes.iter().map(|p| p.view()).collect::<Vec<_>>(),
            rows,
            columns,
        ))
    } else {
        stack_integer_planes(slices, &order, rows, columns)?
    };

    Ok(Assembly {
        grid,
        order,
        mixed_rescale,
    })
}

/// Stacks (rows, columns) planes into a (columns, rows, n) volume.
fn stack_planes<T: Copy + Default>(
    planes: &[ArrayView2<'_, T>],
    rows: usize,
    columns: usize,
) -> Array3<T> {
    let mut volume = Array3::from_elem((columns, rows, planes.len()), T::default());
    for (k, plane) in planes.iter().enumerate() {
        volume.slice_mut(s![.., .., k]).assign(&plane.t());
    }
    volume
}

macro_rules! stack_variant {
    ($variant:ident, $slices:expr, $order:expr, $rows:expr, $columns:expr) => {{
        let planes = $order
            .order
            .iter()
            .map(|&i| match &$slices[i].pixels {
                PixelGrid::$variant(plane) => Ok(plane.view()),
                other => Err(StitchError::UnsupportedPixelData(format!(
                    "slice {} holds {} samples in a {} series",
                    i,
                    other.kind(),
                    $slices[0].pixels.kind()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        VolumeGrid::$variant(stack_planes(&planes, $rows, $columns))
    }};
}

fn stack_integer_planes(
    slices: &[SliceDescriptor],
    order: &SliceOrder,
    rows: usize,
    columns: usize,
) -> Result<VolumeGrid> {
    Ok(match slices[0].pixels {
        PixelGrid::U8(_) => stack_variant!(U8, slices, order, rows, columns),
        PixelGrid::I8(_) => stack_variant!(I8, slices, order, rows, columns),
        PixelGrid::U16(_) => stack_variant!(U16, slices, order, rows, columns),
        PixelGrid::I16(_) => stack_variant!(I16, slices, order, rows, columns),
        PixelGrid::U32(_) => stack_variant!(U32, slices, order, rows, columns),
        PixelGrid::I32(_) => stack_variant!(I32, slices, order, rows, columns),
    })
}

/// Plane `k` of a (columns, rows, slices) volume, back in (rows, columns) layout.
pub fn plane_at<T: Clone>(volume: &Array3<T>, k: usize) -> Array2<T> {
    volume.index_axis(Axis(2), k).t().to_owned()
}
