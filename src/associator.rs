//! Groups DICOM files by series and links structure sets to those series.
//!
//! Association runs in two passes. The first pass reads the identifiers of
//! every file: images are grouped by series UID, structure sets record the
//! series UID their reference chain points at, or failing that, a frame of
//! reference UID. The second pass matches every structure set against the
//! groups, by series UID first and by frame of reference UID second.

use std::{
    fs,
    path::{Path, PathBuf},
};

use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use log::{debug, info, warn};

use crate::{
    error::Result,
    tags::{first_item, get_string_value, require_string},
};

/// Modalities that carry image slices.
const IMAGE_MODALITIES: &[&str] = &["MR", "PT", "CT"];
const STRUCTURE_SET_MODALITY: &str = "RTSTRUCT";

/// What a DICOM file contributes to association.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileRole {
    Image {
        series_uid: String,
        frame_uid: Option<String>,
    },
    StructureSet {
        /// Series UID reached through the reference chain, if it resolved.
        referenced_series_uid: Option<String>,
        frame_uid: Option<String>,
    },
    /// A modality that takes no part in association.
    Other(String),
}

impl FileRole {
    pub fn from_dicom_object(dcm: &InMemDicomObject) -> Result<Self> {
        let modality = require_string(dcm, tags::MODALITY, "Modality")?;

        if IMAGE_MODALITIES.contains(&modality.as_str()) {
            Ok(FileRole::Image {
                series_uid: require_string(dcm, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?,
                frame_uid: get_string_value(dcm, tags::FRAME_OF_REFERENCE_UID),
            })
        } else if modality == STRUCTURE_SET_MODALITY {
            Ok(FileRole::StructureSet {
                referenced_series_uid: referenced_series_uid(dcm),
                frame_uid: referenced_frame_uid(dcm),
            })
        } else {
            Ok(FileRole::Other(modality))
        }
    }
}

/// ReferencedFrameOfReferenceSequence → RTReferencedStudySequence →
/// RTReferencedSeriesSequence → SeriesInstanceUID, first item at each level.
pub fn referenced_series_uid(dcm: &InMemDicomObject) -> Option<String> {
    let frame = first_item(dcm, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)?;
    let study = first_item(frame, tags::RT_REFERENCED_STUDY_SEQUENCE)?;
    let series = first_item(study, tags::RT_REFERENCED_SERIES_SEQUENCE)?;
    get_string_value(series, tags::SERIES_INSTANCE_UID)
}

/// Frame of reference of the first referenced frame, else the file's own.
pub fn referenced_frame_uid(dcm: &InMemDicomObject) -> Option<String> {
    first_item(dcm, tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)
        .and_then(|frame| get_string_value(frame, tags::FRAME_OF_REFERENCE_UID))
        .or_else(|| get_string_value(dcm, tags::FRAME_OF_REFERENCE_UID))
}

/// The image files of one series and the mask files associated with it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeriesGroup {
    pub series_uid: String,
    /// Frame of reference of the first image seen for the series.
    pub frame_uid: Option<String>,
    pub image_paths: Vec<PathBuf>,
    pub mask_paths: Vec<PathBuf>,
}

impl SeriesGroup {
    fn new(series_uid: String, frame_uid: Option<String>) -> Self {
        Self {
            series_uid,
            frame_uid,
            ..Default::default()
        }
    }
}

/// Outcome of matching one mask file against the series groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaskMatch {
    /// Indices of the groups sharing the mask's referenced series UID.
    MatchedBySeries(Vec<usize>),
    /// Indices of the groups sharing the mask's frame of reference UID.
    MatchedByFrame(Vec<usize>),
    Unmatched,
}

impl MaskMatch {
    pub fn groups(&self) -> &[usize] {
        match self {
            MaskMatch::MatchedBySeries(groups) | MaskMatch::MatchedByFrame(groups) => groups,
            MaskMatch::Unmatched => &[],
        }
    }

    pub fn is_matched(&self) -> bool {
        !matches!(self, MaskMatch::Unmatched)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingMask {
    path: PathBuf,
    referenced_series_uid: Option<String>,
    frame_uid: Option<String>,
}

/// Result of the second pass.
#[derive(Clone, Debug, Default)]
pub struct Association {
    pub groups: Vec<SeriesGroup>,
    pub matches: Vec<(PathBuf, MaskMatch)>,
    /// Files whose identifiers could not be read.
    pub unreadable: Vec<PathBuf>,
}

impl Association {
    pub fn unmatched_masks(&self) -> impl Iterator<Item = &Path> {
        self.matches
            .iter()
            .filter(|(_, m)| !m.is_matched())
            .map(|(path, _)| path.as_path())
    }
}

/// Accumulates the first pass over a set of files.
#[derive(Clone, Debug, Default)]
pub struct SeriesAssociator {
    groups: Vec<SeriesGroup>,
    masks: Vec<PendingMask>,
    unreadable: Vec<PathBuf>,
}

impl SeriesAssociator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every file below `dir`, recursively.
    pub fn scan_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let mut associator = Self::new();
        let mut files = Vec::new();
        collect_files(dir.as_ref(), &mut files)?;
        files.sort();
        info!("Scanning {} files in {}", files.len(), dir.as_ref().display());

        for path in files {
            associator.push_file(path);
        }
        Ok(associator)
    }

    /// Reads the identifiers of one file, deferring it when they are unreadable.
    ///
    /// Parsing stops at the pixel data.
    pub fn push_file(&mut self, path: PathBuf) {
        let role = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(&path)
            .map_err(Into::into)
            .and_then(|obj| FileRole::from_dicom_object(&obj));
        match role {
            Ok(role) => self.push(path, role),
            Err(e) => {
                debug!("Deferring {}: {e}", path.display());
                self.unreadable.push(path);
            }
        }
    }

    pub fn push(&mut self, path: PathBuf, role: FileRole) {
        match role {
            FileRole::Image {
                series_uid,
                frame_uid,
            } => {
                let index = match self.group_index(&series_uid) {
                    Some(index) => index,
                    None => {
                        self.groups.push(SeriesGroup::new(series_uid, frame_uid));
                        self.groups.len() - 1
                    }
                };
                self.groups[index].image_paths.push(path);
            }
            FileRole::StructureSet {
                referenced_series_uid,
                frame_uid,
            } => self.masks.push(PendingMask {
                path,
                referenced_series_uid,
                frame_uid,
            }),
            FileRole::Other(modality) => {
                debug!("Ignoring {} with modality {modality}", path.display());
            }
        }
    }

    fn group_index(&self, series_uid: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.series_uid == series_uid)
    }

    /// Second pass: attaches every mask file to the groups it matches.
    ///
    /// A mask whose series UID resolved but matches neither a series nor a
    /// frame of reference opens a new group of its own.
    pub fn associate(mut self) -> Association {
        let masks = std::mem::take(&mut self.masks);
        let mut matches = Vec::with_capacity(masks.len());

        for mask in masks {
            let mut matched = self.match_mask(&mask);
            if !matched.is_matched() {
                if let Some(series_uid) = &mask.referenced_series_uid {
                    debug!(
                        "Mask {} references unseen series {series_uid}, adding a series slot",
                        mask.path.display()
                    );
                    self.groups
                        .push(SeriesGroup::new(series_uid.clone(), mask.frame_uid.clone()));
                    matched = MaskMatch::MatchedBySeries(vec![self.groups.len() - 1]);
                }
            }

            for &index in matched.groups() {
                self.groups[index].mask_paths.push(mask.path.clone());
            }
            if !matched.is_matched() {
                warn!("Mask file {} matches no series", mask.path.display());
            }
            matches.push((mask.path, matched));
        }

        Association {
            groups: self.groups,
            matches,
            unreadable: self.unreadable,
        }
    }

    fn match_mask(&self, mask: &PendingMask) -> MaskMatch {
        let by_series = self.matching_groups(|g| {
            mask.referenced_series_uid.as_deref() == Some(g.series_uid.as_str())
        });
        if !by_series.is_empty() {
            return MaskMatch::MatchedBySeries(by_series);
        }

        let by_frame = self.matching_groups(|g| {
            mask.frame_uid.is_some() && g.frame_uid.as_deref() == mask.frame_uid.as_deref()
        });
        if !by_frame.is_empty() {
            return MaskMatch::MatchedByFrame(by_frame);
        }
        MaskMatch::Unmatched
    }

    fn matching_groups(&self, predicate: impl Fn(&SeriesGroup) -> bool) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| predicate(g))
            .map(|(i, _)| i)
            .collect()
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR, value::DataSetSequence};

    fn image(series: &str, frame: &str) -> FileRole {
        FileRole::Image {
            series_uid: series.to_string(),
            frame_uid: Some(frame.to_string()),
        }
    }

    fn mask(series: Option<&str>, frame: Option<&str>) -> FileRole {
        FileRole::StructureSet {
            referenced_series_uid: series.map(str::to_string),
            frame_uid: frame.map(str::to_string),
        }
    }

    fn two_series() -> SeriesAssociator {
        let mut associator = SeriesAssociator::new();
        associator.push("a1.dcm".into(), image("1.1", "9.1"));
        associator.push("b1.dcm".into(), image("1.2", "9.1"));
        associator.push("a2.dcm".into(), image("1.1", "9.2"));
        associator.push("c1.dcm".into(), image("1.3", "9.3"));
        associator
    }

    #[test]
    fn test_images_grouped_by_series() {
        let association = two_series().associate();
        assert_eq!(association.groups.len(), 3);
        let first = &association.groups[0];
        assert_eq!(first.series_uid, "1.1");
        assert_eq!(first.frame_uid.as_deref(), Some("9.1"));
        assert_eq!(
            first.image_paths,
            vec![PathBuf::from("a1.dcm"), PathBuf::from("a2.dcm")]
        );
    }

    #[test]
    fn test_match_by_series_first() {
        let mut associator = two_series();
        associator.push("rs.dcm".into(), mask(Some("1.2"), Some("9.3")));
        let association = associator.associate();
        assert_eq!(
            association.matches[0].1,
            MaskMatch::MatchedBySeries(vec![1])
        );
        assert_eq!(association.groups[1].mask_paths, vec![PathBuf::from("rs.dcm")]);
        assert!(association.groups[2].mask_paths.is_empty());
    }

    #[test]
    fn test_frame_fallback_fans_out() {
        let mut associator = two_series();
        associator.push("rs.dcm".into(), mask(None, Some("9.1")));
        let association = associator.associate();
        assert_eq!(
            association.matches[0].1,
            MaskMatch::MatchedByFrame(vec![0, 1])
        );
        assert_eq!(association.groups[0].mask_paths.len(), 1);
        assert_eq!(association.groups[1].mask_paths.len(), 1);
    }

    #[test]
    fn test_unresolved_mask_is_unmatched() {
        let mut associator = two_series();
        associator.push("rs.dcm".into(), mask(None, Some("9.9")));
        associator.push("rs2.dcm".into(), mask(None, None));
        let association = associator.associate();
        assert_eq!(association.matches[0].1, MaskMatch::Unmatched);
        assert_eq!(association.matches[1].1, MaskMatch::Unmatched);
        assert!(association.groups.iter().all(|g| g.mask_paths.is_empty()));
        assert_eq!(association.unmatched_masks().count(), 2);
    }

    #[test]
    fn test_unknown_series_opens_new_slot() {
        let mut associator = two_series();
        associator.push("rs.dcm".into(), mask(Some("1.7"), Some("9.9")));
        let association = associator.associate();
        assert_eq!(association.groups.len(), 4);
        assert_eq!(association.matches[0].1, MaskMatch::MatchedBySeries(vec![3]));
        assert!(association.groups[3].image_paths.is_empty());
        assert_eq!(association.groups[3].series_uid, "1.7");
    }

    #[test]
    fn test_unknown_series_prefers_frame_fallback() {
        let mut associator = two_series();
        associator.push("rs.dcm".into(), mask(Some("1.7"), Some("9.3")));
        let association = associator.associate();
        assert_eq!(association.groups.len(), 3);
        assert_eq!(association.matches[0].1, MaskMatch::MatchedByFrame(vec![2]));
    }

    fn item(tag: dicom::core::Tag, element: DataElement<InMemDicomObject>) -> DataElement<InMemDicomObject> {
        DataElement::new(
            tag,
            VR::SQ,
            DataSetSequence::from(vec![InMemDicomObject::from_element_iter([element])]),
        )
    }

    #[test]
    fn test_structure_set_reference_chain() {
        let series = DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3"),
        );
        let chain = item(
            tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
            item(
                tags::RT_REFERENCED_STUDY_SEQUENCE,
                item(tags::RT_REFERENCED_SERIES_SEQUENCE, series),
            ),
        );

        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("RTSTRUCT")));
        dcm.put(DataElement::new(
            tags::FRAME_OF_REFERENCE_UID,
            VR::UI,
            PrimitiveValue::from("9.9"),
        ));
        dcm.put(chain);

        assert_eq!(
            FileRole::from_dicom_object(&dcm).unwrap(),
            FileRole::StructureSet {
                referenced_series_uid: Some("1.2.3".to_string()),
                frame_uid: Some("9.9".to_string()),
            }
        );
    }

    #[test]
    fn test_roles_from_modality() {
        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")));
        dcm.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.4"),
        ));
        assert_eq!(
            FileRole::from_dicom_object(&dcm).unwrap(),
            FileRole::Image {
                series_uid: "1.4".to_string(),
                frame_uid: None
            }
        );

        let mut other = InMemDicomObject::new_empty();
        other.put(DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("SR")));
        assert_eq!(
            FileRole::from_dicom_object(&other).unwrap(),
            FileRole::Other("SR".to_string())
        );

        assert!(FileRole::from_dicom_object(&InMemDicomObject::new_empty()).is_err());
    }

    #[test]
    fn test_scan_defers_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a dicom file").unwrap();
        std::fs::write(dir.path().join("nested").join("broken.dcm"), b"DICM").unwrap();

        let association = SeriesAssociator::scan_directory(dir.path()).unwrap().associate();
        assert!(association.groups.is_empty());
        assert_eq!(association.unreadable.len(), 2);
    }

    #[test]
    fn test_identifiers_read_without_pixel_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.dcm");
        crate::volume_loader::fixtures::ct_file("1.1", 1, 0.0, 2, 2, &[1, 2, 3, 4])
            .write_to_file(&path)
            .unwrap();
        // cut into the pixel data value
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let mut associator = SeriesAssociator::new();
        associator.push_file(path.clone());
        let association = associator.associate();
        assert!(association.unreadable.is_empty());
        assert_eq!(association.groups[0].series_uid, "1.1");
        assert_eq!(association.groups[0].image_paths, vec![path]);
    }
}
