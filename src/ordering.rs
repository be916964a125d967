//! Through-plane ordering and spacing of a slice collection.

use crate::{
    error::{Result, StitchError},
    slice::SliceDescriptor,
};

#[inline]
pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub(crate) fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Canonical order of a slice collection.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceOrder {
    /// Indices into the input collection, ascending along the slice normal.
    pub order: Vec<usize>,
    /// Projected positions, sorted.
    pub positions: Vec<f64>,
    /// Mean distance between consecutive sorted positions, 0 for one slice.
    pub spacing: f64,
    pub normal: [f64; 3],
}

impl SliceOrder {
    /// Input index of the lowest slice, `None` for an empty order.
    pub fn first(&self) -> Option<usize> {
        self.order.first().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Differences between consecutive sorted positions.
    pub fn steps(&self) -> Vec<f64> {
        steps(&self.positions)
    }
}

/// Slice-axis normal, the cross product of the row and column cosines.
pub fn slice_normal(row_cosine: &[f64; 3], column_cosine: &[f64; 3]) -> [f64; 3] {
    cross(row_cosine, column_cosine)
}

/// Position of every slice projected onto the normal of the first slice.
pub fn projected_positions(slices: &[SliceDescriptor]) -> Result<Vec<f64>> {
    let first = slices.first().ok_or(StitchError::NoSlices)?;
    let normal = slice_normal(&first.header.row_cosine, &first.header.column_cosine);
    Ok(slices
        .iter()
        .map(|slice| dot(&normal, &slice.header.position))
        .collect())
}

pub(crate) fn steps(sorted_positions: &[f64]) -> Vec<f64> {
    sorted_positions.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Sorts the slices by projected position.
///
/// Slices sharing a projected position keep their input order.
pub fn resolve_order(slices: &[SliceDescriptor]) -> Result<SliceOrder> {
    let projected = projected_positions(slices)?;
    let first = &slices[0].header;
    let normal = slice_normal(&first.row_cosine, &first.column_cosine);

    let mut order: Vec<usize> = (0..slices.len()).collect();
    order.sort_by(|&a, &b| projected[a].total_cmp(&projected[b]));

    let positions: Vec<f64> = order.iter().map(|&i| projected[i]).collect();
    let diffs = steps(&positions);
    let spacing = if diffs.is_empty() {
        0.0
    } else {
        diffs.iter().sum::<f64>() / diffs.len() as f64
    };

    Ok(SliceOrder {
        order,
        positions,
        spacing,
        normal,
    })
}
