//! Sparse storage of regions of interest as flat voxel indices.
//!
//! ROIs usually cover well under one percent of a volume, so only the
//! indices of the voxels they contain are kept. Dense masks are rebuilt on
//! demand against a target grid.

use std::collections::BTreeMap;

use ndarray::{Array3, ArrayView3};

use crate::{
    convention::flip_flat_indices,
    error::{Result, StitchError},
};

/// Flat indices of the nonzero voxels of a mask, with the voxel count of the
/// grid they index into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatIndices {
    pub indices: Vec<usize>,
    pub voxel_count: usize,
}

impl FlatIndices {
    pub fn new(indices: Vec<usize>, voxel_count: usize) -> Self {
        Self {
            indices,
            voxel_count,
        }
    }

    /// Nonzero voxels of `mask`, in row-major order.
    pub fn from_mask<T: Default + PartialEq>(mask: ArrayView3<'_, T>) -> Self {
        Self {
            indices: nonzero_flat_indices(mask),
            voxel_count: mask.len(),
        }
    }
}

/// Row-major flat indices of the nonzero elements of a 3D array.
pub fn nonzero_flat_indices<T: Default + PartialEq>(data: ArrayView3<'_, T>) -> Vec<usize> {
    let zero = T::default();
    data.iter()
        .enumerate()
        .filter(|(_, v)| **v != zero)
        .map(|(i, _)| i)
        .collect()
}

/// One region of interest of a volume.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoiRecord {
    pub indices: Vec<usize>,
    pub source_voxel_count: usize,
    pub name: Option<String>,
    /// User-defined name of the structure set the ROI comes from.
    pub name_set: Option<String>,
    /// Which attribute `name_set` was taken from, e.g. `StructureSetName`.
    pub name_set_info: Option<String>,
}

/// All ROIs of one volume, keyed by integer.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoiStore {
    records: BTreeMap<usize, RoiRecord>,
}

impl RoiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next unused key.
    pub fn next_key(&self) -> usize {
        self.records.keys().next_back().map_or(0, |k| k + 1)
    }

    /// Stores the indices of `key`. Indices are not checked against any grid.
    pub fn update(&mut self, key: usize, indices: FlatIndices) {
        let record = self.records.entry(key).or_default();
        record.indices = indices.indices;
        record.source_voxel_count = indices.voxel_count;
    }

    pub fn update_name(&mut self, key: usize, name: impl Into<String>) {
        self.records.entry(key).or_default().name = Some(name.into());
    }

    pub fn update_name_set(&mut self, key: usize, name_set: impl Into<String>) {
        self.records.entry(key).or_default().name_set = Some(name_set.into());
    }

    pub fn update_name_set_info(&mut self, key: usize, name_set_info: impl Into<String>) {
        self.records.entry(key).or_default().name_set_info = Some(name_set_info.into());
    }

    /// Indices of `key`; empty when the key was never set.
    pub fn get(&self, key: usize) -> &[usize] {
        self.records
            .get(&key)
            .map(|r| r.indices.as_slice())
            .unwrap_or(&[])
    }

    pub fn record(&self, key: usize) -> Option<&RoiRecord> {
        self.records.get(&key)
    }

    pub fn records(&self) -> impl Iterator<Item = (usize, &RoiRecord)> {
        self.records.iter().map(|(k, r)| (*k, r))
    }

    /// ROI names in key order; unnamed ROIs are skipped.
    pub fn names(&self) -> Vec<&str> {
        self.records
            .values()
            .filter_map(|r| r.name.as_deref())
            .collect()
    }

    pub fn key_by_name(&self, name: &str) -> Option<usize> {
        self.records
            .iter()
            .find(|(_, r)| r.name.as_deref() == Some(name))
            .map(|(k, _)| *k)
    }

    /// Dense 0/1 mask of `key` over a grid of shape `dim`.
    ///
    /// Fails when the ROI was extracted from a grid with another voxel count.
    /// An unset key gives an empty mask.
    pub fn to_dense_mask(&self, key: usize, dim: (usize, usize, usize)) -> Result<Array3<u8>> {
        let voxel_count = dim.0 * dim.1 * dim.2;
        let mut flat = vec![0u8; voxel_count];

        if let Some(record) = self.records.get(&key) {
            if record.source_voxel_count != voxel_count {
                return Err(StitchError::VoxelCountMismatch {
                    source_voxels: record.source_voxel_count,
                    target_voxels: voxel_count,
                });
            }
            for &index in &record.indices {
                let voxel = flat
                    .get_mut(index)
                    .ok_or(StitchError::IndexOutOfBounds { index, voxel_count })?;
                *voxel = 1;
            }
        }

        Ok(Array3::from_shape_vec(dim, flat)?)
    }

    /// Flips every ROI along the first two axes of a grid of shape `dim`,
    /// following a convention conversion of its volume.
    pub fn flip_in_plane(&mut self, dim: (usize, usize, usize)) -> Result<()> {
        let voxel_count = dim.0 * dim.1 * dim.2;
        for record in self.records.values_mut() {
            if record.source_voxel_count != voxel_count {
                return Err(StitchError::VoxelCountMismatch {
                    source_voxels: record.source_voxel_count,
                    target_voxels: voxel_count,
                });
            }
            record.indices = flip_flat_indices(&record.indices, dim)?;
        }
        Ok(())
    }

    pub fn mask_by_name(&self, name: &str, dim: (usize, usize, usize)) -> Option<Result<Array3<u8>>> {
        self.key_by_name(name).map(|key| self.to_dense_mask(key, dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn store_with_roi() -> RoiStore {
        let mut store = RoiStore::new();
        store.update(0, FlatIndices::new(vec![1, 5, 23], 24));
        store.update_name(0, "GTV");
        store.update_name_set(0, "RTstruct");
        store.update_name_set_info(0, "StructureSetName");
        store
    }

    #[test]
    fn test_unset_key_is_empty() {
        let store = RoiStore::new();
        assert!(store.get(3).is_empty());
        assert!(store.record(3).is_none());
        assert_eq!(store.next_key(), 0);
    }

    #[test]
    fn test_names_and_lookup() {
        let mut store = store_with_roi();
        store.update(1, FlatIndices::new(vec![2], 24));
        store.update_name(1, "CTV");
        store.update(2, FlatIndices::new(vec![], 24));

        assert_eq!(store.names(), vec!["GTV", "CTV"]);
        assert_eq!(store.key_by_name("CTV"), Some(1));
        assert_eq!(store.key_by_name("PTV"), None);
        assert_eq!(store.get(0), &[1, 5, 23]);
        let record = store.record(0).unwrap();
        assert_eq!(record.name_set.as_deref(), Some("RTstruct"));
        assert_eq!(record.name_set_info.as_deref(), Some("StructureSetName"));
        assert_eq!(store.next_key(), 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_dense_mask_round_trip() {
        let store = store_with_roi();
        let mask = store.to_dense_mask(0, (2, 3, 4)).unwrap();
        assert_eq!(mask.iter().filter(|&&v| v == 1).count(), 3);
        assert_eq!(mask[[0, 0, 1]], 1);
        assert_eq!(mask[[0, 1, 1]], 1);
        assert_eq!(mask[[1, 2, 3]], 1);

        let extracted = FlatIndices::from_mask(mask.view());
        assert_eq!(extracted.indices, store.get(0));
        assert_eq!(extracted.voxel_count, 24);
    }

    #[rstest]
    #[case((2, 3, 5))]
    #[case((1, 1, 1))]
    fn test_dense_mask_voxel_count_mismatch(#[case] dim: (usize, usize, usize)) {
        let store = store_with_roi();
        assert!(matches!(
            store.to_dense_mask(0, dim),
            Err(StitchError::VoxelCountMismatch {
                source_voxels: 24,
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_range_index_fails_at_reconstruction() {
        let mut store = RoiStore::new();
        store.update(0, FlatIndices::new(vec![2, 30], 24));
        assert_eq!(store.get(0), &[2, 30]);
        assert!(matches!(
            store.to_dense_mask(0, (2, 3, 4)),
            Err(StitchError::IndexOutOfBounds { index: 30, .. })
        ));
    }

    #[test]
    fn test_flip_in_plane_moves_indices() {
        let mut store = store_with_roi();
        let before = store.to_dense_mask(0, (2, 3, 4)).unwrap();
        store.flip_in_plane((2, 3, 4)).unwrap();
        let after = store.to_dense_mask(0, (2, 3, 4)).unwrap();
        assert_eq!(after[[1, 2, 1]], before[[0, 0, 1]]);
        assert_eq!(after[[0, 0, 3]], before[[1, 2, 3]]);
        assert!(store.flip_in_plane((2, 2, 2)).is_err());
    }

    #[test]
    fn test_mask_by_name() {
        let store = store_with_roi();
        assert!(store.mask_by_name("GTV", (4, 3, 2)).unwrap().is_ok());
        assert!(store.mask_by_name("missing", (4, 3, 2)).is_none());
        assert_eq!(
            store.to_dense_mask(7, (4, 3, 2)).unwrap().iter().sum::<u8>(),
            0
        );
    }
}
