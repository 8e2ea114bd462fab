//! Sampling anchors.
//!
//! Anchors are pixels of a regular grid whose spacing approximates the
//! typical object size. An object may only be sampled if it holds at least
//! one anchor, and its representative location is its first anchor in
//! row-major order, so every object yields at most one sample location.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::{check_grid, ObiaError, Result};
use crate::grid::{LabeledGrid, Mask, PixelLocation, Region, NO_OBJECT};

/// Anchor every `spacing` pixels in both directions, offset half a cell so
/// anchors sit at cell centres.
pub fn seed_grid(width: usize, height: usize, spacing: usize) -> Result<Mask> {
    if spacing == 0 {
        return Err(ObiaError::InvalidConfig("anchor spacing must be at least 1".into()));
    }
    let offset = spacing / 2;
    let mut mask = Mask::new(width, height, false);
    for row in (offset..height).step_by(spacing) {
        for col in (offset..width).step_by(spacing) {
            mask.set(row, col, true);
        }
    }
    Ok(mask)
}

/// First anchor of each object within `region` of the grids.
pub fn first_anchors_in(labels: &LabeledGrid, anchors: &Mask, region: Region) -> Result<BTreeMap<u32, PixelLocation>> {
    check_grid("anchor mask", labels.dims(), anchors.dims())?;
    let mut out = BTreeMap::new();
    for row in region.row0..region.row0 + region.rows {
        for col in region.col0..region.col0 + region.cols {
            let id = labels.get(row, col);
            if id == NO_OBJECT || !anchors.get(row, col) {
                continue;
            }
            out.entry(id).or_insert_with(|| labels.location(row, col));
        }
    }
    Ok(out)
}

/// First anchor of each object over the whole grid.
pub fn object_anchors(labels: &LabeledGrid, anchors: &Mask) -> Result<BTreeMap<u32, PixelLocation>> {
    first_anchors_in(labels, anchors, Region::full(labels.width, labels.height))
}

/// Keep the row-major earliest location per object.
pub fn merge_anchors(into: &mut BTreeMap<u32, PixelLocation>, from: BTreeMap<u32, PixelLocation>) {
    for (id, loc) in from {
        match into.entry(id) {
            Entry::Occupied(mut e) => {
                if loc.key() < e.get().key() {
                    e.insert(loc);
                }
            }
            Entry::Vacant(e) => {
                e.insert(loc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_grid_spacing() {
        let mask = seed_grid(20, 10, 10).unwrap();
        assert_eq!(mask.count(), 2);
        assert!(mask.get(5, 5) && mask.get(5, 15));
        assert!(seed_grid(4, 4, 0).is_err());
        assert_eq!(seed_grid(3, 3, 1).unwrap().count(), 9);
    }

    #[test]
    fn first_anchor_is_row_major_earliest() {
        let mut labels = LabeledGrid::new(4, 4, 1);
        labels.set(3, 3, 2);
        let mut anchors = Mask::new(4, 4, false);
        anchors.set(2, 1, true);
        anchors.set(1, 3, true);
        anchors.set(3, 3, true);

        let found = object_anchors(&labels, &anchors).unwrap();
        assert_eq!(found[&1].key(), (1, 3));
        assert_eq!(found[&2].key(), (3, 3));
    }

    #[test]
    fn objects_without_anchor_are_absent() {
        let labels = LabeledGrid::new(3, 3, 8);
        let anchors = Mask::new(3, 3, false);
        assert!(object_anchors(&labels, &anchors).unwrap().is_empty());
    }

    #[test]
    fn merge_keeps_earliest_location() {
        let labels = LabeledGrid::new(6, 6, 1);
        let mut a = BTreeMap::from([(1, labels.location(4, 0))]);
        merge_anchors(&mut a, BTreeMap::from([(1, labels.location(2, 5)), (2, labels.location(0, 0))]));
        assert_eq!(a[&1].key(), (2, 5));
        assert_eq!(a[&2].key(), (0, 0));
    }
}
