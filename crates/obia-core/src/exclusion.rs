//! Validation exclusion: any object touching a reserved validation pixel is
//! withheld from training, whole.

use std::collections::BTreeSet;

use crate::error::{check_grid, Result};
use crate::grid::{LabeledGrid, Mask};
use crate::zonal::{aggregate, Reducer, ZonalStats};

/// Objects with at least one marked pixel.
pub fn exclusions(labels: &LabeledGrid, marks: &Mask) -> Result<BTreeSet<u32>> {
    check_grid("validation marks", labels.dims(), marks.dims())?;
    let band = marks.to_band();
    let stats = aggregate(labels, &[&band], &[Reducer::Max])?;
    Ok(excluded_in(&stats, 0))
}

/// Objects whose max over `band` (an indicator band) is non-zero.
pub fn excluded_in(stats: &ZonalStats, band: usize) -> BTreeSet<u32> {
    stats
        .objects
        .iter()
        .filter(|(_, obj)| {
            obj.bands
                .get(band)
                .and_then(|acc| acc.reduce(Reducer::Max))
                .is_some_and(|m| m != 0.0)
        })
        .map(|(&id, _)| id)
        .collect()
}
