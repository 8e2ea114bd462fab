//! Per-object zonal statistics.
//!
//! One pass over the label grid feeds every band's accumulator for the
//! pixel's object. Accumulators keep count, sum, sum of squares, min, max
//! and optionally a frequency table of integer codes, so partial results from
//! row chunks or tiles merge by plain addition.
//!
//! Statistics are population statistics:
//!   mean   = Σv / n
//!   stdDev = √(Σv² / n − mean²)
//! which is exactly 0 for a constant integer-coded group.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{check_grid, Result};
use crate::grid::{LabeledGrid, Region, ValueBand, NO_OBJECT};

/// Rows handed to one worker when accumulation runs threaded.
#[cfg(feature = "threading")]
const ROW_CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Count,
    Sum,
    Mean,
    StdDev,
    Min,
    Max,
    Mode,
}

// ── Accumulators ─────────────────────────────────────────────────────────────

/// Running statistics of one band over one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: f64,
    pub max: f64,
    /// Frequency of each integer code; `None` when modes are not tracked.
    pub codes: Option<BTreeMap<i64, u64>>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            codes: None,
        }
    }
}

impl Accumulator {
    /// An accumulator that also keeps a code frequency table.
    pub fn with_codes() -> Self {
        Self { codes: Some(BTreeMap::new()), ..Self::default() }
    }

    #[inline]
    pub fn push(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        if let Some(codes) = &mut self.codes {
            *codes.entry(v.round() as i64).or_insert(0) += 1;
        }
    }

    pub fn merge(&mut self, other: &Accumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        match (&mut self.codes, &other.codes) {
            (Some(mine), Some(theirs)) => {
                for (&code, &n) in theirs {
                    *mine.entry(code).or_insert(0) += n;
                }
            }
            (None, Some(theirs)) => self.codes = Some(theirs.clone()),
            _ => {}
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = self.sum_sq / self.count as f64 - mean * mean;
        Some(var.max(0.0).sqrt())
    }

    /// Most frequent code; ties go to the lowest code.
    pub fn mode(&self) -> Option<i64> {
        self.codes
            .as_ref()?
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(&code, _)| code)
    }

    pub fn reduce(&self, reducer: Reducer) -> Option<f64> {
        match reducer {
            Reducer::Count => Some(self.count as f64),
            _ if self.count == 0 => None,
            Reducer::Sum => Some(self.sum),
            Reducer::Mean => self.mean(),
            Reducer::StdDev => self.std_dev(),
            Reducer::Min => Some(self.min),
            Reducer::Max => Some(self.max),
            Reducer::Mode => self.mode().map(|m| m as f64),
        }
    }
}

/// All band accumulators of one object plus its labelled pixel count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectAccumulator {
    /// Pixels carrying the object's id, whatever the band validity.
    pub pixels: u64,
    pub bands: Vec<Accumulator>,
}

impl ObjectAccumulator {
    /// Empty accumulator for `track_codes.len()` bands.
    pub fn template(track_codes: &[bool]) -> Self {
        Self {
            pixels: 0,
            bands: track_codes
                .iter()
                .map(|&t| if t { Accumulator::with_codes() } else { Accumulator::default() })
                .collect(),
        }
    }

    pub fn merge(&mut self, other: &ObjectAccumulator) {
        self.pixels += other.pixels;
        if self.bands.len() < other.bands.len() {
            self.bands.resize_with(other.bands.len(), Accumulator::default);
        }
        for (mine, theirs) in self.bands.iter_mut().zip(&other.bands) {
            mine.merge(theirs);
        }
    }
}

/// Fold `from` into `into`, merging accumulators that share a key.
pub fn merge_into<K: Eq + Hash>(into: &mut HashMap<K, ObjectAccumulator>, from: HashMap<K, ObjectAccumulator>) {
    for (key, acc) in from {
        match into.entry(key) {
            Entry::Occupied(mut e) => e.get_mut().merge(&acc),
            Entry::Vacant(e) => {
                e.insert(acc);
            }
        }
    }
}

// ── Accumulation pass ────────────────────────────────────────────────────────

fn accumulate_rows(
    labels: &LabeledGrid,
    bands: &[&ValueBand],
    template: &ObjectAccumulator,
    region: Region,
    rows: Range<usize>,
) -> HashMap<u32, ObjectAccumulator> {
    let mut out: HashMap<u32, ObjectAccumulator> = HashMap::new();
    for row in rows {
        for col in region.col0..region.col0 + region.cols {
            let id = labels.get(row, col);
            if id == NO_OBJECT {
                continue;
            }
            let entry = out.entry(id).or_insert_with(|| template.clone());
            entry.pixels += 1;
            for (acc, band) in entry.bands.iter_mut().zip(bands) {
                let v = band.get(row, col);
                if v.is_finite() {
                    acc.push(v as f64);
                }
            }
        }
    }
    out
}

/// Accumulate every band over the pixels of `region`, grouped by object id.
///
/// `track_codes[i]` enables the mode table for `bands[i]`. Every object with
/// at least one labelled pixel in `region` gets an entry, even when all its
/// band values are no-data.
pub fn accumulate(
    labels: &LabeledGrid,
    bands: &[&ValueBand],
    track_codes: &[bool],
    region: Region,
) -> Result<HashMap<u32, ObjectAccumulator>> {
    for (i, band) in bands.iter().enumerate() {
        check_grid(&format!("value band {i}"), labels.dims(), band.dims())?;
    }
    let template = ObjectAccumulator::template(track_codes);
    let rows = region.row0..region.row0 + region.rows;

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;

        let chunks: Vec<Range<usize>> = rows
            .clone()
            .step_by(ROW_CHUNK)
            .map(|start| start..(start + ROW_CHUNK).min(rows.end))
            .collect();
        // Collected in chunk order so the merge, and hence rounding, is stable.
        let partials: Vec<HashMap<u32, ObjectAccumulator>> = chunks
            .into_par_iter()
            .map(|chunk| accumulate_rows(labels, bands, &template, region, chunk))
            .collect();
        let mut merged = HashMap::new();
        for partial in partials {
            merge_into(&mut merged, partial);
        }
        Ok(merged)
    }

    #[cfg(not(feature = "threading"))]
    {
        Ok(accumulate_rows(labels, bands, &template, region, rows))
    }
}

// ── Finalised statistics ─────────────────────────────────────────────────────

/// Accumulated statistics for every object, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct ZonalStats {
    pub objects: BTreeMap<u32, ObjectAccumulator>,
}

impl ZonalStats {
    pub fn from_accumulators(objects: impl IntoIterator<Item = (u32, ObjectAccumulator)>) -> Self {
        Self { objects: objects.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.objects.keys().copied()
    }

    pub fn pixel_count(&self, id: u32) -> Option<u64> {
        self.objects.get(&id).map(|o| o.pixels)
    }

    pub fn band(&self, id: u32, band: usize) -> Option<&Accumulator> {
        self.objects.get(&id)?.bands.get(band)
    }

    /// A single reduced value; `None` when the object has no valid pixel.
    pub fn value(&self, id: u32, band: usize, reducer: Reducer) -> Option<f64> {
        self.band(id, band)?.reduce(reducer)
    }

    /// `id → [band][reducer]` table of reduced values.
    pub fn reduce(&self, reducers: &[Reducer]) -> BTreeMap<u32, Vec<Vec<Option<f64>>>> {
        self.objects
            .iter()
            .map(|(&id, obj)| {
                let per_band = obj
                    .bands
                    .iter()
                    .map(|acc| reducers.iter().map(|&r| acc.reduce(r)).collect())
                    .collect();
                (id, per_band)
            })
            .collect()
    }
}

/// Zonal statistics of `bands` grouped by the objects of `labels`.
///
/// Mode tables are only kept when `reducers` asks for [`Reducer::Mode`].
pub fn aggregate(labels: &LabeledGrid, bands: &[&ValueBand], reducers: &[Reducer]) -> Result<ZonalStats> {
    let track = reducers.contains(&Reducer::Mode);
    let track_codes = vec![track; bands.len()];
    let region = Region::full(labels.width, labels.height);
    let objects = accumulate(labels, bands, &track_codes, region)?;
    Ok(ZonalStats::from_accumulators(objects))
}
