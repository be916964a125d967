//! Checks that an unordered slice collection forms a uniform rectilinear grid.

use std::fmt::Debug;

use log::warn;

use crate::{
    config::GeometryTolerances,
    error::{Result, StitchError},
    ordering::{dot, norm, projected_positions, steps},
    slice::{SliceDescriptor, SliceHeader},
};

/// Validates the slices of one series.
///
/// Must run before assembly: shared attributes, orientation of the first
/// slice, then the spacing of the projected slice positions.
pub fn validate_uniform_grid(
    slices: &[SliceDescriptor],
    tolerances: &GeometryTolerances,
) -> Result<()> {
    let first = slices.first().ok_or(StitchError::NoSlices)?;

    for slice in &slices[1..] {
        check_shared_attributes(&first.header, &slice.header)?;
    }

    validate_orientation(
        &first.header.row_cosine,
        &first.header.column_cosine,
        tolerances,
    )?;

    let mut positions = projected_positions(slices)?;
    positions.sort_by(f64::total_cmp);
    check_for_missing_slices(&positions, tolerances)
}

fn ensure_equal<T: PartialEq + Debug>(attribute: &'static str, expected: &T, found: &T) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(StitchError::GridInconsistency {
            attribute,
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
        })
    }
}

fn check_shared_attributes(first: &SliceHeader, other: &SliceHeader) -> Result<()> {
    ensure_equal("Modality", &first.modality, &other.modality)?;
    ensure_equal("SOPClassUID", &first.sop_class_uid, &other.sop_class_uid)?;
    ensure_equal("SeriesInstanceUID", &first.series_uid, &other.series_uid)?;
    ensure_equal("Rows", &first.rows, &other.rows)?;
    ensure_equal("Columns", &first.columns, &other.columns)?;
    ensure_equal(
        "ImageOrientationPatient",
        &first.orientation(),
        &other.orientation(),
    )?;
    ensure_equal("PixelSpacing", &first.pixel_spacing, &other.pixel_spacing)?;
    ensure_equal(
        "PixelRepresentation",
        &first.bit_depth.pixel_representation,
        &other.bit_depth.pixel_representation,
    )?;
    ensure_equal(
        "BitsAllocated",
        &first.bit_depth.bits_allocated,
        &other.bit_depth.bits_allocated,
    )?;
    ensure_equal(
        "BitsStored",
        &first.bit_depth.bits_stored,
        &other.bit_depth.bits_stored,
    )?;
    ensure_equal("HighBit", &first.bit_depth.high_bit, &other.bit_depth.high_bit)
}

/// Direction cosines must be perpendicular and of unit length.
///
/// Deviations beyond the hard tolerance fail, deviations beyond the soft
/// tolerance are logged.
pub fn validate_orientation(
    row_cosine: &[f64; 3],
    column_cosine: &[f64; 3],
    tolerances: &GeometryTolerances,
) -> Result<()> {
    let product = dot(row_cosine, column_cosine).abs();
    if product > tolerances.orientation_hard {
        return Err(StitchError::OrientationDegenerate(format!(
            "non-orthogonal direction cosines: {row_cosine:?}, {column_cosine:?}"
        )));
    } else if product > tolerances.orientation_soft {
        warn!("Direction cosines aren't quite orthogonal: {row_cosine:?}, {column_cosine:?}");
    }

    for (name, cosine) in [("row", row_cosine), ("column", column_cosine)] {
        let deviation = (norm(cosine) - 1.0).abs();
        if deviation > tolerances.orientation_hard {
            return Err(StitchError::OrientationDegenerate(format!(
                "the {name} direction cosine's magnitude is not 1: {cosine:?}"
            )));
        } else if deviation > tolerances.orientation_soft {
            warn!("The {name} direction cosine's magnitude is not quite 1: {cosine:?}");
        }
    }

    Ok(())
}

fn relative_deviation(step: f64, first_step: f64) -> f64 {
    let deviation = (step - first_step).abs();
    if first_step == 0.0 {
        if deviation == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        deviation / first_step.abs()
    }
}

/// Compares every step between sorted positions with the first step.
///
/// Slices missing at either end of the series cannot be detected.
pub fn check_for_missing_slices(
    sorted_positions: &[f64],
    tolerances: &GeometryTolerances,
) -> Result<()> {
    let diffs = steps(sorted_positions);
    let Some(&first_step) = diffs.first() else {
        return Ok(());
    };

    let (worst, worst_step) = diffs
        .iter()
        .map(|&step| (relative_deviation(step, first_step), step))
        .fold((0.0, first_step), |acc, item| if item.0 > acc.0 { item } else { acc });

    if worst >= tolerances.missing_slice {
        return Err(StitchError::MissingSlices {
            first_step,
            step: worst_step,
        });
    }
    if worst > tolerances.spacing_warning {
        warn!("The slice spacing is non-uniform. Slice spacings: {diffs:?}");
    }
    Ok(())
}
