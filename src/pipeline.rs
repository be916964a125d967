//! Runs the reconstruction of many series and gathers the outcomes.
//!
//! Every series is processed on its own on a bounded thread pool. A series
//! that fails is logged and recorded in the summary; it never stops its
//! siblings. Finished series are merged into a [`ResultCollection`] on the
//! calling thread.

use std::path::{Path, PathBuf};

use log::{info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::{
    associator::{Association, SeriesAssociator, SeriesGroup},
    config::StitchConfig,
    enums::Convention,
    error::{Result, StitchError},
    nifti_loader::{ImageFileName, NiftiFiles, NiftiLoader},
    roi::RoiStore,
    volume::Volume,
    volume_loader::VolumeLoader,
};

/// One reconstructed series with its ROIs.
#[derive(Clone, Debug)]
pub struct ProcessedSeries {
    /// Series instance UID for DICOM, file name for NIfTI.
    pub id: String,
    pub patient_id: Option<String>,
    pub volume: Volume,
    /// ROI indices addressing `volume` in its current convention.
    pub rois: RoiStore,
    /// Structure set files associated with the series.
    pub mask_paths: Vec<PathBuf>,
}

impl ProcessedSeries {
    /// Converts the volume and its ROIs to `target` together.
    pub fn convert_to(mut self, target: Convention) -> Result<Self> {
        if self.volume.convention() != target {
            self.rois.flip_in_plane(self.volume.dim())?;
            self.volume = self.volume.convert_to(target);
        }
        Ok(self)
    }
}

/// Bounded accumulator of processed series.
///
/// Once `capacity` series are held, further ones are dropped with a
/// warning and only their identifiers are kept.
#[derive(Debug, Default)]
pub struct ResultCollection {
    capacity: usize,
    series: Vec<ProcessedSeries>,
    dropped: Vec<String>,
}

impl ResultCollection {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            series: Vec::with_capacity(capacity.min(16)),
            dropped: Vec::new(),
        }
    }

    /// Returns whether the series was kept.
    pub fn push(&mut self, series: ProcessedSeries) -> bool {
        if self.is_full() {
            warn!(
                "Result collection is full ({} series), dropping {}",
                self.capacity, series.id
            );
            self.dropped.push(series.id);
            return false;
        }
        self.series.push(series);
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.series.len() >= self.capacity
    }

    pub fn get(&self, id: &str) -> Option<&ProcessedSeries> {
        self.series.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessedSeries> {
        self.series.iter()
    }

    /// Identifiers of the series dropped for lack of room.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn into_series(self) -> Vec<ProcessedSeries> {
        self.series
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FailedSeries {
    pub id: String,
    pub reason: String,
}

/// What happened to every series and file of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessingSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedSeries>,
    /// Succeeded but not kept, see [`ResultCollection`].
    pub dropped: Vec<String>,
    /// Mask files that matched no series.
    pub unmatched_masks: Vec<PathBuf>,
    /// Files whose identifiers could not be read.
    pub unreadable: Vec<PathBuf>,
    /// Series mixing rescaled and non-rescaled slices.
    pub mixed_rescale: Vec<String>,
}

impl ProcessingSummary {
    /// Unmatched masks as errors.
    pub fn association_errors(&self) -> Vec<StitchError> {
        self.unmatched_masks
            .iter()
            .cloned()
            .map(StitchError::AssociationAmbiguous)
            .collect()
    }

    fn record(&mut self, id: String, outcome: &Result<ProcessedSeries>) {
        match outcome {
            Ok(series) => {
                if series.volume.mixed_rescale() {
                    self.mixed_rescale.push(id.clone());
                }
                self.succeeded.push(id);
            }
            Err(e) => {
                warn!("Series {id} failed: {e}");
                self.failed.push(FailedSeries {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Results and summary of a run.
#[derive(Debug)]
pub struct PipelineOutput {
    pub results: ResultCollection,
    pub summary: ProcessingSummary,
}

pub struct Pipeline {
    config: StitchConfig,
}

impl Pipeline {
    pub fn new(config: StitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    fn thread_pool(&self) -> Result<ThreadPool> {
        Ok(ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("stitch-worker-{i}"))
            .build()?)
    }

    /// Scans a directory of DICOM files and reconstructs every series in it.
    pub fn process_dicom_directory(&self, dir: impl AsRef<Path>) -> Result<PipelineOutput> {
        let association = SeriesAssociator::scan_directory(dir)?.associate();
        self.process_series_groups(association)
    }

    /// Reconstructs the series of an association.
    ///
    /// Groups opened by a structure set alone have no images and end up as
    /// failed series.
    pub fn process_series_groups(&self, association: Association) -> Result<PipelineOutput> {
        let mut summary = ProcessingSummary {
            unmatched_masks: association.unmatched_masks().map(Path::to_path_buf).collect(),
            unreadable: association.unreadable,
            ..Default::default()
        };
        info!(
            "Processing {} DICOM series with {} workers",
            association.groups.len(),
            self.config.workers
        );

        let pool = self.thread_pool()?;
        let outcomes: Vec<_> = pool.install(|| {
            association
                .groups
                .into_par_iter()
                .map(|group| (group.series_uid.clone(), self.process_group(group)))
                .collect()
        });

        let results = self.collect(outcomes, &mut summary);
        Ok(PipelineOutput { results, summary })
    }

    fn process_group(&self, group: SeriesGroup) -> Result<ProcessedSeries> {
        let volume = VolumeLoader::load_from_file_paths(&group.image_paths, &self.config.tolerances)?;
        ProcessedSeries {
            id: group.series_uid,
            patient_id: None,
            volume,
            rois: RoiStore::new(),
            mask_paths: group.mask_paths,
        }
        .convert_to(self.config.target_convention)
    }

    /// Loads every NIfTI image below a directory with the masks named after it.
    pub fn process_nifti_directory(&self, dir: impl AsRef<Path>) -> Result<PipelineOutput> {
        let files = NiftiFiles::scan_directory(dir)?;
        let images: Vec<_> = files
            .images
            .iter()
            .map(|path| (path, ImageFileName::from_path(path)))
            .collect();

        let mut summary = ProcessingSummary {
            unmatched_masks: files
                .masks
                .iter()
                .filter(|mask| {
                    let name = mask.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                    !images
                        .iter()
                        .any(|(_, image)| image.as_ref().is_some_and(|i| i.owns_mask(name)))
                })
                .cloned()
                .collect(),
            ..Default::default()
        };
        for mask in &summary.unmatched_masks {
            warn!("Mask file {} matches no image", mask.display());
        }

        let pool = self.thread_pool()?;
        let outcomes: Vec<_> = pool.install(|| {
            images
                .par_iter()
                .map(|(path, image)| {
                    let id = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let outcome = NiftiLoader::load_image_with_rois(path, &files).and_then(
                        |(volume, rois)| {
                            ProcessedSeries {
                                id: id.clone(),
                                patient_id: image.as_ref().map(|i| i.patient_id.clone()),
                                volume,
                                rois,
                                mask_paths: image
                                    .as_ref()
                                    .map(|i| files.masks_of(i).cloned().collect())
                                    .unwrap_or_default(),
                            }
                            .convert_to(self.config.target_convention)
                        },
                    );
                    (id, outcome)
                })
                .collect()
        });

        let results = self.collect(outcomes, &mut summary);
        Ok(PipelineOutput { results, summary })
    }

    fn collect(
        &self,
        outcomes: Vec<(String, Result<ProcessedSeries>)>,
        summary: &mut ProcessingSummary,
    ) -> ResultCollection {
        let mut results = ResultCollection::new(self.config.max_kept_results);

        for (id, outcome) in outcomes {
            summary.record(id, &outcome);
            if let Ok(series) = outcome {
                if self.config.keep_results {
                    results.push(series);
                }
            }
        }
        summary.dropped = results.dropped().to_vec();

        info!(
            "Processed {} series: {} succeeded, {} failed, {} dropped",
            summary.succeeded.len() + summary.failed.len(),
            summary.succeeded.len(),
            summary.failed.len(),
            summary.dropped.len()
        );
        results
    }
}
