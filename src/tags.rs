//! Attribute access helpers over in-memory DICOM objects.

use dicom::{core::Tag, object::InMemDicomObject};

use crate::error::{Result, StitchError};

/// String value of a tag, trimmed of padding.
///
/// Returns `None` if the tag is not present or cannot be converted to string
pub fn get_string_value(dcm: &InMemDicomObject, tag: Tag) -> Option<String> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_str().ok())
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_f64_value(dcm: &InMemDicomObject, tag: Tag) -> Option<f64> {
    dcm.element(tag).ok().and_then(|elem| elem.to_float64().ok())
}

pub fn get_multi_f64_value(dcm: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_multi_float64().ok())
}

pub fn get_u16_value(dcm: &InMemDicomObject, tag: Tag) -> Option<u16> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_int::<u16>().ok())
}

/// First item of a sequence attribute.
pub fn first_item(dcm: &InMemDicomObject, tag: Tag) -> Option<&InMemDicomObject> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.items())
        .and_then(|items| items.first())
}

pub fn require_string(dcm: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<String> {
    get_string_value(dcm, tag).ok_or(StitchError::MissingAttribute(name))
}

pub fn require_u16(dcm: &InMemDicomObject, tag: Tag, name: &'static str) -> Result<u16> {
    get_u16_value(dcm, tag).ok_or(StitchError::MissingAttribute(name))
}

/// Multi-valued numeric attribute with exactly `N` values.
pub fn require_f64_array<const N: usize>(
    dcm: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<[f64; N]> {
    get_multi_f64_value(dcm, tag)
        .and_then(|values| <[f64; N]>::try_from(values).ok())
        .ok_or(StitchError::MissingAttribute(name))
}
